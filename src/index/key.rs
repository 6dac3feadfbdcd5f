//! Addressing types: the index's key/value pair

use std::fmt;

use serde::{Deserialize, Serialize};

/// Small integer tag identifying a registered record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(pub u16);

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one logical record: (record type, primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub type_tag: TypeTag,
    pub id: u64,
}

impl RecordKey {
    pub fn new(type_tag: TypeTag, id: u64) -> Self {
        Self { type_tag, id }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.type_tag, self.id)
    }
}

/// One physical, self-contained byte range in the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocation {
    /// Byte offset of the frame's length field
    pub offset: u64,
    /// Frame length including framing and checksum
    pub length: u32,
}

impl FileLocation {
    pub fn new(offset: u64, length: u32) -> Self {
        Self { offset, length }
    }

    /// First byte after the frame
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.offset, self.length)
    }
}
