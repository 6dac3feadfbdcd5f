//! Record-type registry
//!
//! Maps record-type names to the small integer tags stored on disk. Tags are
//! assigned once, in order, and persisted with every index fragment.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, StoreError};
use crate::index::TypeTag;

#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    by_name: HashMap<String, TypeTag>,
    by_tag: BTreeMap<TypeTag, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted `(name, tag)` pairs
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u16)>) -> Self {
        let mut registry = Self::new();
        for (name, tag) in entries {
            registry.by_name.insert(name.clone(), TypeTag(tag));
            registry.by_tag.insert(TypeTag(tag), name);
        }
        registry
    }

    pub fn tag_of(&self, name: &str) -> Option<TypeTag> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, tag: TypeTag) -> Option<&str> {
        self.by_tag.get(&tag).map(String::as_str)
    }

    /// Return the tag for `name`, assigning the next free one if needed
    ///
    /// The boolean is true when a new tag was assigned.
    pub fn resolve_or_assign(&mut self, name: &str) -> Result<(TypeTag, bool)> {
        if let Some(tag) = self.tag_of(name) {
            return Ok((tag, false));
        }

        let next = match self.by_tag.keys().next_back() {
            Some(last) => last.0.checked_add(1).ok_or_else(|| {
                StoreError::InvalidOperation("record type tag space exhausted".to_string())
            })?,
            None => 1,
        };

        let tag = TypeTag(next);
        self.by_name.insert(name.to_string(), tag);
        self.by_tag.insert(tag, name.to_string());
        Ok((tag, true))
    }

    /// `(name, tag)` pairs in tag order, for persistence
    pub fn entries(&self) -> Vec<(String, u16)> {
        self.by_tag
            .iter()
            .map(|(tag, name)| (name.clone(), tag.0))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable_and_sequential() {
        let mut registry = TypeRegistry::new();

        assert_eq!(registry.resolve_or_assign("a").unwrap(), (TypeTag(1), true));
        assert_eq!(registry.resolve_or_assign("b").unwrap(), (TypeTag(2), true));
        assert_eq!(registry.resolve_or_assign("a").unwrap(), (TypeTag(1), false));
        assert_eq!(registry.name_of(TypeTag(2)), Some("b"));
    }

    #[test]
    fn restored_registry_continues_after_highest_tag() {
        let mut registry = TypeRegistry::from_entries(vec![("x".to_string(), 5)]);
        let (tag, _) = registry.resolve_or_assign("y").unwrap();
        assert_eq!(tag, TypeTag(6));
        assert_eq!(registry.entries().len(), 2);
    }
}
