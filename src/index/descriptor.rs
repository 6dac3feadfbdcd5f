//! Descriptors and persisted index fragments
//!
//! Every flush appends an index fragment: the overlay's net changes plus
//! snapshots of the registry, dictionary and histogram, and a pointer to the
//! previous fragment. The in-memory `Descriptor` is the immutable handle to
//! the latest fragment.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{DictionarySnapshot, RecordDecoder};
use crate::error::{Result, StoreError};

use super::{FileLocation, HistogramSnapshot, RecordKey};

/// On-disk body of an index fragment frame (bincode)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFragment {
    pub format: u16,
    pub txn: u64,
    pub generation: u64,
    pub previous: Option<FileLocation>,
    pub types: Vec<(String, u16)>,
    pub dictionary: Vec<String>,
    pub histogram: HistogramSnapshot,
    pub puts: Vec<(RecordKey, FileLocation)>,
    pub removals: Vec<RecordKey>,
}

impl IndexFragment {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(offset: u64, bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| {
            StoreError::corrupted(offset, format!("unreadable index fragment: {}", e))
        })
    }
}

/// Immutable description of the index as of one flush
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    tail: FileLocation,
    previous: Option<FileLocation>,
    format: u16,
    generation: u64,
    txn: u64,
    dictionary: Arc<DictionarySnapshot>,
}

impl Descriptor {
    pub fn new(tail: FileLocation, fragment: &IndexFragment, dictionary: Arc<DictionarySnapshot>) -> Self {
        Self {
            tail,
            previous: fragment.previous,
            format: fragment.format,
            generation: fragment.generation,
            txn: fragment.txn,
            dictionary,
        }
    }

    /// Location of the fragment this descriptor was read from or written as
    pub fn tail(&self) -> FileLocation {
        self.tail
    }

    pub fn previous(&self) -> Option<FileLocation> {
        self.previous
    }

    pub fn format_version(&self) -> u16 {
        self.format
    }

    /// Number of flushes since the file was created
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn txn(&self) -> u64 {
        self.txn
    }

    pub fn dictionary(&self) -> &Arc<DictionarySnapshot> {
        &self.dictionary
    }

    /// A decoder bound to this descriptor's dictionary snapshot
    pub fn decoder(&self) -> RecordDecoder {
        RecordDecoder::new(Arc::clone(&self.dictionary))
    }
}
