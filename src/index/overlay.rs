//! Write-behind overlay
//!
//! Puts and removes that were appended to the file but not yet promoted into
//! the durable map. Per-type count deltas are kept relative to the durable
//! map, so promotion can apply them directly to the histogram.

use std::collections::HashMap;

use super::{FileLocation, RecordKey, TypeTag};

/// A put (`location = Some`) or remove (`location = None`) awaiting flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonFlushedValue {
    pub key: RecordKey,
    pub location: Option<FileLocation>,
}

impl NonFlushedValue {
    pub fn is_removal(&self) -> bool {
        self.location.is_none()
    }
}

/// Result of consulting the overlay for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Fresh location written since the last flush
    Present(FileLocation),
    /// Tombstone: removed since the last flush
    Removed,
    /// Overlay knows nothing; ask the durable map
    Missing,
}

#[derive(Debug, Clone, Default)]
pub struct Overlay {
    entries: HashMap<RecordKey, NonFlushedValue>,
    count_deltas: HashMap<TypeTag, i64>,
    appended_bytes: u64,
    max_record_size: u32,
}

impl Overlay {
    pub fn lookup(&self, key: &RecordKey) -> Lookup {
        match self.entries.get(key) {
            Some(NonFlushedValue {
                location: Some(location),
                ..
            }) => Lookup::Present(*location),
            Some(_) => Lookup::Removed,
            None => Lookup::Missing,
        }
    }

    fn visible(&self, key: &RecordKey, durable_present: bool) -> bool {
        match self.lookup(key) {
            Lookup::Present(_) => true,
            Lookup::Removed => false,
            Lookup::Missing => durable_present,
        }
    }

    /// Record an appended put
    ///
    /// The type count moves by +1 for a key that was not visible, 0 for an overwrite.
    pub fn record_put(&mut self, key: RecordKey, location: FileLocation, durable_present: bool) {
        if !self.visible(&key, durable_present) {
            *self.count_deltas.entry(key.type_tag).or_insert(0) += 1;
        }

        self.entries.insert(
            key,
            NonFlushedValue {
                key,
                location: Some(location),
            },
        );
        self.appended_bytes += u64::from(location.length);
        self.max_record_size = self.max_record_size.max(location.length);
    }

    /// Record a remove; returns false (and changes nothing) if the key is not visible
    pub fn record_remove(&mut self, key: RecordKey, durable_present: bool) -> bool {
        if !self.visible(&key, durable_present) {
            return false;
        }

        *self.count_deltas.entry(key.type_tag).or_insert(0) -= 1;

        if durable_present {
            self.entries.insert(key, NonFlushedValue { key, location: None });
        } else {
            // never promoted: forgetting the put is enough
            self.entries.remove(&key);
        }
        true
    }

    pub fn values(&self) -> impl Iterator<Item = &NonFlushedValue> {
        self.entries.values()
    }

    pub fn count_delta(&self, tag: TypeTag) -> i64 {
        self.count_deltas.get(&tag).copied().unwrap_or(0)
    }

    pub fn count_deltas(&self) -> &HashMap<TypeTag, i64> {
        &self.count_deltas
    }

    /// Data bytes appended since the last flush, overwritten frames included
    pub fn appended_bytes(&self) -> u64 {
        self.appended_bytes
    }

    pub fn max_record_size(&self) -> u32 {
        self.max_record_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: TypeTag = TypeTag(1);

    fn key(id: u64) -> RecordKey {
        RecordKey::new(A, id)
    }

    #[test]
    fn overwrite_keeps_count() {
        let mut overlay = Overlay::default();
        overlay.record_put(key(7), FileLocation::new(16, 30), false);
        assert_eq!(overlay.count_delta(A), 1);

        overlay.record_put(key(7), FileLocation::new(46, 30), false);
        assert_eq!(overlay.count_delta(A), 1);
        assert_eq!(overlay.lookup(&key(7)), Lookup::Present(FileLocation::new(46, 30)));
    }

    #[test]
    fn overwrite_of_durable_key_is_zero() {
        let mut overlay = Overlay::default();
        overlay.record_put(key(1), FileLocation::new(16, 30), true);
        assert_eq!(overlay.count_delta(A), 0);
    }

    #[test]
    fn remove_of_durable_key_leaves_tombstone() {
        let mut overlay = Overlay::default();
        assert!(overlay.record_remove(key(1), true));
        assert_eq!(overlay.lookup(&key(1)), Lookup::Removed);
        assert_eq!(overlay.count_delta(A), -1);

        // second remove sees the tombstone
        assert!(!overlay.record_remove(key(1), true));
        assert_eq!(overlay.count_delta(A), -1);
    }

    #[test]
    fn remove_of_overlay_only_key_cancels_put() {
        let mut overlay = Overlay::default();
        overlay.record_put(key(2), FileLocation::new(16, 30), false);
        assert!(overlay.record_remove(key(2), false));

        assert_eq!(overlay.lookup(&key(2)), Lookup::Missing);
        assert_eq!(overlay.count_delta(A), 0);
        assert!(overlay.is_empty());
    }

    #[test]
    fn remove_of_absent_key_is_noop() {
        let mut overlay = Overlay::default();
        assert!(!overlay.record_remove(key(9), false));
        assert_eq!(overlay.count_delta(A), 0);
    }
}
