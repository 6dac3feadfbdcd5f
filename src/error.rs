//! Error types for offsetstore
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for offsetstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// fsync or buffer flush to the OS failed; durability is no longer guaranteed
    #[error("sync failed: {0}")]
    SyncFailed(#[source] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("corrupted record at offset {offset} (sequence {}): {reason}", fmt_sequence(.sequence))]
    CorruptedRecord {
        offset: u64,
        sequence: Option<u64>,
        reason: String,
    },

    #[error("stored version {requested} of `{kind}` not supported (supported: {supported:?})")]
    VersionNotSupported {
        kind: String,
        requested: u16,
        supported: Vec<u16>,
    },

    /// A freshly appended record could not be read back after a soft flush
    #[error("record at offset {offset} not yet durable: {source}")]
    NotYetDurable {
        offset: u64,
        #[source]
        source: Box<StoreError>,
    },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("reader pool exhausted: {capacity} handles in use after waiting {waited:?}")]
    PoolExhausted { capacity: usize, waited: Duration },

    // -------------------------------------------------------------------------
    // Precondition Errors
    // -------------------------------------------------------------------------
    #[error("invalid storage path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("offset index is closed")]
    Closed,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// Corruption found while decoding a single record on demand
    pub fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptedRecord {
            offset,
            sequence: None,
            reason: reason.into(),
        }
    }

    /// Corruption found by a sequential scan, where the frame number is known
    pub fn corrupted_at(offset: u64, sequence: u64, reason: impl Into<String>) -> Self {
        Self::CorruptedRecord {
            offset,
            sequence: Some(sequence),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that indicate damaged bytes on disk
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::CorruptedRecord { .. } => true,
            Self::NotYetDurable { source, .. } => source.is_corruption(),
            _ => false,
        }
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

fn fmt_sequence(sequence: &Option<u64>) -> String {
    match sequence {
        Some(seq) => seq.to_string(),
        None => "unknown".to_string(),
    }
}
