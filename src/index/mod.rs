//! Index Module
//!
//! In-memory key → location index and its write-behind overlay.
//!
//! ## Responsibilities
//! - Durable map: locations covered by a persisted index fragment
//! - Overlay: puts/removes appended since the last flush
//! - Promotion of the overlay into a new durable map on flush
//! - Histogram of live records per type and byte counters
//! - Descriptor chain persisted as index fragments in the same file
//!
//! ## Key States
//! ```text
//!            put                         flush
//!  absent ─────────► overlay-present ─────────► durable
//!                                                  │ remove
//!  absent ◄───────── overlay-removed ◄─────────────┘
//!            flush
//! ```
//! The durable map is never mutated in place: flush builds the next map and
//! swaps it in whole.

mod descriptor;
mod histogram;
mod key;
mod overlay;

use std::collections::HashMap;

pub use descriptor::{Descriptor, IndexFragment};
pub use histogram::{Histogram, HistogramSnapshot};
pub use key::{FileLocation, RecordKey, TypeTag};
pub use overlay::{Lookup, NonFlushedValue, Overlay};

/// Durable key → location map
pub type DurableMap = HashMap<RecordKey, FileLocation>;

/// Build `durable ∪ overlay puts − overlay removals`
///
/// Also returns the change in live bytes, for the histogram.
pub fn promote(durable: &DurableMap, overlay: &Overlay) -> (DurableMap, i64) {
    let mut next = durable.clone();
    let mut live_delta: i64 = 0;

    for value in overlay.values() {
        let replaced = match value.location {
            Some(location) => {
                live_delta += i64::from(location.length);
                next.insert(value.key, location)
            }
            None => next.remove(&value.key),
        };
        if let Some(old) = replaced {
            live_delta -= i64::from(old.length);
        }
    }

    (next, live_delta)
}
