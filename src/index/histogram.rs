//! Histogram of live records
//!
//! Counters are owned by one index instance and only change while the
//! overlay is promoted, so readers see either the old or the new totals.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{Overlay, TypeTag};

/// Persistable copy of the histogram
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    /// Live records per type tag
    pub counts: BTreeMap<u16, u64>,
    /// Data bytes ever promoted (never decremented)
    pub total_bytes: u64,
    /// Bytes of frames currently referenced by the durable map
    pub live_bytes: u64,
    /// Largest data frame ever promoted
    pub max_record_size: u32,
}

impl HistogramSnapshot {
    /// Snapshot after promoting `overlay`
    pub fn promoted(&self, overlay: &Overlay, live_delta: i64) -> Self {
        let mut next = self.clone();

        for (tag, delta) in overlay.count_deltas() {
            let count = next.counts.entry(tag.0).or_insert(0);
            *count = apply_delta(*count, *delta);
            if *count == 0 {
                next.counts.remove(&tag.0);
            }
        }

        next.total_bytes += overlay.appended_bytes();
        next.live_bytes = apply_delta(next.live_bytes, live_delta);
        next.max_record_size = next.max_record_size.max(overlay.max_record_size());
        next
    }
}

fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

#[derive(Debug, Default)]
pub struct Histogram {
    counts: RwLock<BTreeMap<TypeTag, u64>>,
    total_bytes: AtomicU64,
    live_bytes: AtomicU64,
    max_record_size: AtomicU32,
}

impl Histogram {
    pub fn from_snapshot(snapshot: &HistogramSnapshot) -> Self {
        let histogram = Self::default();
        histogram.store(snapshot);
        histogram
    }

    /// Replace every counter (promotion critical section only)
    pub fn store(&self, snapshot: &HistogramSnapshot) {
        *self.counts.write() = snapshot
            .counts
            .iter()
            .map(|(tag, count)| (TypeTag(*tag), *count))
            .collect();
        self.total_bytes.store(snapshot.total_bytes, Ordering::Release);
        self.live_bytes.store(snapshot.live_bytes, Ordering::Release);
        self.max_record_size
            .fetch_max(snapshot.max_record_size, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            counts: self
                .counts
                .read()
                .iter()
                .map(|(tag, count)| (tag.0, *count))
                .collect(),
            total_bytes: self.total_bytes(),
            live_bytes: self.live_bytes(),
            max_record_size: self.max_record_size(),
        }
    }

    pub fn count(&self, tag: TypeTag) -> u64 {
        self.counts.read().get(&tag).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> BTreeMap<TypeTag, u64> {
        self.counts.read().clone()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::Acquire)
    }

    pub fn max_record_size(&self) -> u32 {
        self.max_record_size.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FileLocation, RecordKey};

    #[test]
    fn promoted_snapshot_applies_overlay() {
        let mut overlay = Overlay::default();
        overlay.record_put(RecordKey::new(TypeTag(1), 1), FileLocation::new(16, 40), false);
        overlay.record_put(RecordKey::new(TypeTag(1), 1), FileLocation::new(56, 60), false);
        overlay.record_put(RecordKey::new(TypeTag(2), 9), FileLocation::new(116, 20), false);

        let next = HistogramSnapshot::default().promoted(&overlay, 80);

        assert_eq!(next.counts.get(&1), Some(&1));
        assert_eq!(next.counts.get(&2), Some(&1));
        assert_eq!(next.total_bytes, 120);
        assert_eq!(next.live_bytes, 80);
        assert_eq!(next.max_record_size, 60);
    }

    #[test]
    fn store_and_snapshot_agree() {
        let mut snapshot = HistogramSnapshot::default();
        snapshot.counts.insert(3, 10);
        snapshot.total_bytes = 500;
        snapshot.live_bytes = 300;
        snapshot.max_record_size = 70;

        let histogram = Histogram::from_snapshot(&snapshot);
        assert_eq!(histogram.count(TypeTag(3)), 10);
        assert_eq!(histogram.snapshot(), snapshot);
    }
}
