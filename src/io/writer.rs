//! Record Writer
//!
//! The single exclusive appender of the index file. The engine keeps it
//! behind one mutex, which is the only lock the append path needs.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::{Config, SyncStrategy};
use crate::error::{Result, StoreError};
use crate::frame::{encode_frame, ControlFlags, FileHeader, FILE_HEADER_SIZE};
use crate::index::FileLocation;

/// Where an existing file's writer picks up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterResume {
    /// End of the last complete frame
    pub tail: u64,
    /// Transaction id of the last frame
    pub last_txn: u64,
    /// Transaction still open at the tail, if the last frame did not close it
    pub open_txn: Option<u64>,
}

/// Appends frames to the index file
pub struct RecordWriter {
    path: PathBuf,
    file: BufWriter<File>,
    checksums: bool,
    origin: u8,
    sync_strategy: SyncStrategy,

    /// Next append offset
    tail: u64,
    /// Last offset known to be flushed and fsynced (shared with readers)
    synced: Arc<AtomicU64>,
    frames_since_sync: usize,

    open_txn: Option<u64>,
    last_txn: u64,

    /// Set after a failed write; the file tail is no longer trustworthy
    failed: bool,
}

impl RecordWriter {
    /// Create a new file and write its header
    pub fn create(path: &Path, config: &Config) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let header = FileHeader::new(config.checksums, config.origin_id);
        file.write_all(&header.encode())?;
        file.sync_all().map_err(StoreError::SyncFailed)?;

        let resume = WriterResume {
            tail: FILE_HEADER_SIZE,
            last_txn: 0,
            open_txn: None,
        };
        Self::open(path, config, config.checksums, resume)
    }

    /// Open an existing file for appending after `resume.tail`
    ///
    /// The caller has already truncated anything past the tail.
    pub fn open(path: &Path, config: &Config, checksums: bool, resume: WriterResume) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::with_capacity(config.write_buffer_size, file),
            checksums,
            origin: config.origin_id,
            sync_strategy: config.sync_strategy,
            tail: resume.tail,
            synced: Arc::new(AtomicU64::new(resume.tail)),
            frames_since_sync: 0,
            open_txn: resume.open_txn,
            last_txn: resume.last_txn,
            failed: false,
        })
    }

    /// Append one frame and return where it landed
    ///
    /// A transaction id above the open one first closes the open block with
    /// an empty marker frame; an id below it is rejected.
    pub fn append(&mut self, txn: u64, flags: ControlFlags, payload: &[u8]) -> Result<FileLocation> {
        if self.failed {
            return Err(StoreError::InvalidOperation(
                "writer failed earlier; reopen the index".to_string(),
            ));
        }

        match self.open_txn {
            Some(open) if txn < open => {
                return Err(StoreError::InvalidOperation(format!(
                    "transaction {} is older than open transaction {}",
                    txn, open
                )));
            }
            Some(open) if txn > open => {
                let marker = ControlFlags::MARKER.union(ControlFlags::TXN_CLOSE);
                self.write_frame(open, marker, &[])?;
            }
            Some(_) => {}
            None if txn < self.last_txn => {
                return Err(StoreError::InvalidOperation(format!(
                    "transaction {} is older than last transaction {}",
                    txn, self.last_txn
                )));
            }
            None => {}
        }

        let location = self.write_frame(txn, flags, payload)?;

        let due = match self.sync_strategy {
            SyncStrategy::OnFlush => false,
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNRecords { count } => self.frames_since_sync >= count,
        };
        if due {
            self.sync()?;
        }

        Ok(location)
    }

    fn write_frame(&mut self, txn: u64, flags: ControlFlags, payload: &[u8]) -> Result<FileLocation> {
        let frame = encode_frame(flags, self.origin, txn, payload, self.checksums)?;

        if let Err(e) = self.file.write_all(&frame) {
            self.failed = true;
            return Err(StoreError::Io(e));
        }

        let location = FileLocation::new(self.tail, frame.len() as u32);
        self.tail = location.end();
        self.frames_since_sync += 1;
        self.last_txn = txn;
        self.open_txn = if flags.closes_transaction() {
            None
        } else {
            Some(txn)
        };

        trace!(offset = location.offset, length = location.length, txn, "frame appended");
        Ok(location)
    }

    /// Flush the output buffer and fsync; returns the synced tail
    pub fn sync(&mut self) -> Result<u64> {
        if self.failed {
            return Err(StoreError::InvalidOperation(
                "writer failed earlier; reopen the index".to_string(),
            ));
        }

        let result = self
            .file
            .flush()
            .and_then(|()| self.file.get_ref().sync_data());
        if let Err(e) = result {
            self.failed = true;
            return Err(StoreError::SyncFailed(e));
        }

        self.frames_since_sync = 0;
        self.synced.store(self.tail, Ordering::Release);
        debug!(tail = self.tail, "writer synced");
        Ok(self.tail)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset the next frame will be written at
    pub fn tail(&self) -> u64 {
        self.tail
    }

    pub fn synced_tail(&self) -> u64 {
        self.synced.load(Ordering::Acquire)
    }

    /// Shared view of the synced tail, readable without the writer lock
    pub fn synced_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.synced)
    }

    pub fn last_txn(&self) -> u64 {
        self.last_txn
    }

    pub fn open_txn(&self) -> Option<u64> {
        self.open_txn
    }

    pub fn checksums(&self) -> bool {
        self.checksums
    }
}

impl std::fmt::Debug for RecordWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriter")
            .field("path", &self.path)
            .field("tail", &self.tail)
            .field("open_txn", &self.open_txn)
            .field("last_txn", &self.last_txn)
            .finish_non_exhaustive()
    }
}
