//! Key dictionary
//!
//! Assigns compact integer ids to string keys referenced inside payloads.
//! The dictionary only grows, so its size doubles as its version: every new
//! key produces a new immutable snapshot with a higher version.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StoreError};

/// Immutable view of the dictionary at one version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictionarySnapshot {
    names: Vec<String>,
}

impl DictionarySnapshot {
    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn version(&self) -> u64 {
        self.names.len() as u64
    }

    pub fn resolve(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Live, growing dictionary shared by the writer and the decoder pool
#[derive(Debug, Default)]
pub struct KeyDictionary {
    inner: RwLock<DictionaryState>,
}

#[derive(Debug, Default)]
struct DictionaryState {
    ids: HashMap<String, u32>,
    snapshot: Arc<DictionarySnapshot>,
}

impl KeyDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: DictionarySnapshot) -> Self {
        let ids = snapshot
            .names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id as u32))
            .collect();

        Self {
            inner: RwLock::new(DictionaryState {
                ids,
                snapshot: Arc::new(snapshot),
            }),
        }
    }

    /// Id for `name`, assigning a new one if it was never seen
    pub fn intern(&self, name: &str) -> Result<u32> {
        if let Some(&id) = self.inner.read().ids.get(name) {
            return Ok(id);
        }

        let mut state = self.inner.write();
        if let Some(&id) = state.ids.get(name) {
            return Ok(id);
        }

        let id = u32::try_from(state.snapshot.names.len()).map_err(|_| {
            StoreError::InvalidOperation("key dictionary is full".to_string())
        })?;

        let mut names = state.snapshot.names.clone();
        names.push(name.to_string());
        state.snapshot = Arc::new(DictionarySnapshot { names });
        state.ids.insert(name.to_string(), id);

        Ok(id)
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.inner.read().ids.get(name).copied()
    }

    pub fn snapshot(&self) -> Arc<DictionarySnapshot> {
        Arc::clone(&self.inner.read().snapshot)
    }

    pub fn version(&self) -> u64 {
        self.inner.read().snapshot.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let dict = KeyDictionary::new();
        let a = dict.intern("name").unwrap();
        let b = dict.intern("age").unwrap();

        assert_eq!(dict.intern("name").unwrap(), a);
        assert_ne!(a, b);
        assert_eq!(dict.version(), 2);
    }

    #[test]
    fn old_snapshots_are_not_mutated() {
        let dict = KeyDictionary::new();
        dict.intern("a").unwrap();
        let before = dict.snapshot();

        dict.intern("b").unwrap();

        assert_eq!(before.version(), 1);
        assert_eq!(before.resolve(1), None);
        assert_eq!(dict.snapshot().resolve(1), Some("b"));
    }

    #[test]
    fn restored_dictionary_keeps_ids() {
        let snapshot = DictionarySnapshot::from_names(vec!["x".into(), "y".into()]);
        let dict = KeyDictionary::from_snapshot(snapshot);

        assert_eq!(dict.id_of("y"), Some(1));
        assert_eq!(dict.intern("z").unwrap(), 2);
    }
}
