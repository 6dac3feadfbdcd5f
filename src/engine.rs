//! Engine Module
//!
//! The `OffsetIndex` facade that coordinates all components.
//!
//! ## Responsibilities
//! - Funnel put/remove/flush through the single writer
//! - Resolve reads through overlay → durable map → pooled reader
//! - Soft flush before reading bytes that are not yet synced
//! - Persist index fragments on flush and rebuild from them on open
//! - Recover from a torn tail after an unclean shutdown

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::codec::{
    DecoderPool, DictionarySnapshot, FormatId, KeyDictionary, RecordDecoder, RecordPrefix,
    Storable, TypeRegistry, RECORD_PREFIX_SIZE,
};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::frame::{decode_frame, ControlFlags, FILE_HEADER_SIZE, FORMAT_VERSION};
use crate::index::{
    promote, Descriptor, DurableMap, FileLocation, Histogram, HistogramSnapshot, IndexFragment,
    Lookup, Overlay, RecordKey, TypeTag,
};
use crate::io::{ReaderPool, RecordWriter, WriterResume};
use crate::verify::{Verifier, VerifyReport};

/// Undecoded record body as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub location: FileLocation,
    pub format: FormatId,
    pub body: Bytes,
}

/// Counters an external compaction policy can act on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Durable live records per type
    pub durable_counts: BTreeMap<TypeTag, u64>,
    /// Pending count changes per type, not yet flushed
    pub overlay_deltas: BTreeMap<TypeTag, i64>,
    pub type_names: BTreeMap<TypeTag, String>,
    /// Data bytes ever promoted
    pub total_bytes: u64,
    /// Bytes of frames referenced by the durable map
    pub live_bytes: u64,
    /// File bytes not referenced by the durable map
    pub dead_bytes: u64,
    pub max_record_size: u32,
    pub file_len: u64,
    pub generation: u64,
    pub pending: usize,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "generation:       {}", self.generation)?;
        writeln!(f, "file length:      {}", self.file_len)?;
        writeln!(f, "live bytes:       {}", self.live_bytes)?;
        writeln!(f, "dead bytes:       {}", self.dead_bytes)?;
        writeln!(f, "total bytes:      {}", self.total_bytes)?;
        writeln!(f, "max record size:  {}", self.max_record_size)?;
        writeln!(f, "pending changes:  {}", self.pending)?;
        write!(f, "records:")?;
        for (tag, count) in &self.durable_counts {
            let name = self.type_names.get(tag).map(String::as_str).unwrap_or("?");
            write!(f, "\n  {} {}: {}", tag, name, count)?;
        }
        for (tag, delta) in &self.overlay_deltas {
            let name = self.type_names.get(tag).map(String::as_str).unwrap_or("?");
            write!(f, "\n  {} {}: {:+} pending", tag, name, delta)?;
        }
        Ok(())
    }
}

/// Durable map, overlay and descriptor; replaced together on flush
struct IndexState {
    durable: Arc<DurableMap>,
    overlay: Overlay,
    descriptor: Arc<Descriptor>,
}

/// Rebuilt from the fragment chain at open
struct LoadedIndex {
    durable: DurableMap,
    registry: TypeRegistry,
    dictionary: KeyDictionary,
    histogram: HistogramSnapshot,
    descriptor: Descriptor,
}

/// Append-only record store mapping `RecordKey`s to frames in one file
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (put/remove/flush/close): serialized by the `writer` mutex,
///   the only lock the append path needs. Lock order: writer → state.
/// - **Reads** (get/get_binary/contains): take the `state` read lock only to
///   resolve a location, then read through a pooled handle. A read of bytes
///   past the synced tail briefly takes the writer lock to soft flush.
pub struct OffsetIndex {
    config: Config,
    path: PathBuf,
    checksums: bool,

    writer: Mutex<RecordWriter>,
    /// Synced tail, readable without the writer lock
    synced: Arc<AtomicU64>,

    state: RwLock<IndexState>,
    registry: RwLock<TypeRegistry>,
    dictionary: KeyDictionary,
    histogram: Histogram,

    readers: ReaderPool,
    decoders: DecoderPool,

    closed: AtomicBool,
}

impl OffsetIndex {
    /// Open or create the index file described by `config`
    ///
    /// On startup:
    /// 1. Validate config and data directory
    /// 2. Create a fresh file, or scan the existing one
    /// 3. Truncate a torn tail left by a crash
    /// 4. Rebuild the durable index from the fragment chain
    pub fn open(config: Config) -> Result<Self> {
        if config.max_readers == 0 {
            return Err(StoreError::InvalidOperation("max_readers must be > 0".to_string()));
        }
        if config.write_buffer_size == 0 {
            return Err(StoreError::InvalidOperation(
                "write_buffer_size must be > 0".to_string(),
            ));
        }

        prepare_dir(&config)?;
        let path = config.file_path();

        let (writer, loaded) = if path.exists() {
            Self::recover(&path, &config)?
        } else if config.create_if_missing {
            Self::create(&path, &config)?
        } else {
            return Err(StoreError::InvalidPath {
                path,
                reason: "index file does not exist".to_string(),
            });
        };

        let checksums = writer.checksums();
        let synced = writer.synced_handle();
        let readers = ReaderPool::new(&path, config.max_readers, config.pool_wait_timeout());
        let decoders = DecoderPool::new(config.max_readers);

        info!(
            path = %path.display(),
            records = loaded.durable.len(),
            generation = loaded.descriptor.generation(),
            tail = writer.tail(),
            "offset index opened"
        );

        Ok(Self {
            config,
            path,
            checksums,
            writer: Mutex::new(writer),
            synced,
            state: RwLock::new(IndexState {
                durable: Arc::new(loaded.durable),
                overlay: Overlay::default(),
                descriptor: Arc::new(loaded.descriptor),
            }),
            registry: RwLock::new(loaded.registry),
            dictionary: loaded.dictionary,
            histogram: Histogram::from_snapshot(&loaded.histogram),
            readers,
            decoders,
            closed: AtomicBool::new(false),
        })
    }

    /// Open with a file path (convenience method)
    ///
    /// Uses the default config with `data_dir`/`file_name` taken from `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StoreError::InvalidPath {
                path: path.to_path_buf(),
                reason: "no file name".to_string(),
            })?;
        let data_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Self::open(Config::builder().data_dir(data_dir).file_name(file_name).build())
    }

    // =========================================================================
    // Startup
    // =========================================================================

    fn create(path: &Path, config: &Config) -> Result<(RecordWriter, LoadedIndex)> {
        let mut writer = RecordWriter::create(path, config)?;
        let loaded = Self::bootstrap(&mut writer)?;
        info!(path = %path.display(), checksums = config.checksums, "created index file");
        Ok((writer, loaded))
    }

    /// Write the initial empty fragment, so every file has a descriptor
    fn bootstrap(writer: &mut RecordWriter) -> Result<LoadedIndex> {
        let fragment = IndexFragment {
            format: FORMAT_VERSION,
            ..Default::default()
        };
        let location = writer.append(
            0,
            ControlFlags::FRAGMENT.union(ControlFlags::TXN_CLOSE),
            &fragment.encode()?,
        )?;
        writer.sync()?;

        let dictionary = KeyDictionary::new();
        let descriptor = Descriptor::new(location, &fragment, dictionary.snapshot());
        Ok(LoadedIndex {
            durable: DurableMap::new(),
            registry: TypeRegistry::new(),
            dictionary,
            histogram: HistogramSnapshot::default(),
            descriptor,
        })
    }

    fn recover(path: &Path, config: &Config) -> Result<(RecordWriter, LoadedIndex)> {
        let report = Verifier::new(path)
            .checksums(config.verify_checksums_on_open)
            .scan()?;

        if let Some(torn) = report.torn_tail {
            warn!(
                path = %path.display(),
                offset = torn,
                discarded = report.file_len - report.end_offset,
                "truncating incomplete frame at end of file"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(report.end_offset)?;
            file.sync_all().map_err(StoreError::SyncFailed)?;
        }

        let resume = WriterResume {
            tail: report.end_offset,
            last_txn: report.last_txn.unwrap_or(0),
            open_txn: report.open_txn,
        };
        let mut writer = RecordWriter::open(path, config, report.checksums_enabled, resume)?;

        let loaded = match report.last_fragment {
            Some(last) => load_chain(path, last, report.checksums_enabled)?,
            None if report.frames == 0 => {
                // Crashed between writing the header and the first fragment
                warn!(path = %path.display(), "index file has no fragment; reinitializing");
                Self::bootstrap(&mut writer)?
            }
            None => {
                return Err(StoreError::corrupted(
                    FILE_HEADER_SIZE,
                    "file has frames but no index fragment",
                ))
            }
        };

        info!(
            path = %path.display(),
            frames = report.frames,
            fragments = report.fragments,
            unindexed_tail = report.end_offset.saturating_sub(loaded.descriptor.tail().end()),
            "recovered index from fragment chain"
        );
        Ok((writer, loaded))
    }

    // =========================================================================
    // Type Registry
    // =========================================================================

    /// Tag for `T`, assigning one on first use
    pub fn register<T: Storable>(&self) -> Result<TypeTag> {
        if let Some(tag) = self.registry.read().tag_of(T::KIND) {
            return Ok(tag);
        }

        let (tag, assigned) = self.registry.write().resolve_or_assign(T::KIND)?;
        if assigned {
            debug!(kind = T::KIND, %tag, "registered record type");
        }
        Ok(tag)
    }

    /// Key of the `T` record with primary key `id`
    pub fn record_key<T: Storable>(&self, id: u64) -> Result<RecordKey> {
        Ok(RecordKey::new(self.register::<T>()?, id))
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Append `value` under transaction `txn`
    ///
    /// The frame is readable once this returns; it survives a crash only
    /// after the next flush or soft flush.
    pub fn put<T: Storable>(&self, txn: u64, value: &T) -> Result<FileLocation> {
        let mut writer = self.writer.lock();
        self.ensure_open()?;

        let key = self.record_key::<T>(value.part_id())?;

        let mut payload = BytesMut::with_capacity(RECORD_PREFIX_SIZE + 64);
        RecordPrefix {
            type_tag: key.type_tag,
            format: T::FORMAT,
            id: key.id,
        }
        .encode_into(&mut payload);
        value.encode(&mut payload, &self.dictionary)?;

        let location = writer.append(txn, ControlFlags::NONE, &payload)?;

        let mut state = self.state.write();
        let durable_present = state.durable.contains_key(&key);
        state.overlay.record_put(key, location, durable_present);

        Ok(location)
    }

    /// Remove `key`; false if it is not visible
    ///
    /// Nothing is appended: the tombstone is persisted by the next flush.
    pub fn remove(&self, key: RecordKey) -> Result<bool> {
        let _writer = self.writer.lock();
        self.ensure_open()?;

        let mut state = self.state.write();
        let durable_present = state.durable.contains_key(&key);
        Ok(state.overlay.record_remove(key, durable_present))
    }

    /// Persist the overlay as an index fragment and promote it
    ///
    /// With an empty overlay this writes nothing and returns the current
    /// descriptor.
    pub fn flush(&self, txn: u64) -> Result<Arc<Descriptor>> {
        let mut writer = self.writer.lock();
        self.ensure_open()?;
        self.flush_locked(&mut writer, txn)
    }

    fn flush_locked(&self, writer: &mut RecordWriter, txn: u64) -> Result<Arc<Descriptor>> {
        let keys = self.dictionary.snapshot();

        let (fragment, next_durable) = {
            let state = self.state.read();
            if state.overlay.is_empty() {
                return Ok(Arc::clone(&state.descriptor));
            }

            let (next_durable, live_delta) = promote(&state.durable, &state.overlay);

            let mut puts = Vec::new();
            let mut removals = Vec::new();
            for value in state.overlay.values() {
                match value.location {
                    Some(location) => puts.push((value.key, location)),
                    None => removals.push(value.key),
                }
            }
            puts.sort_unstable_by_key(|(key, _)| *key);
            removals.sort_unstable();

            let fragment = IndexFragment {
                format: FORMAT_VERSION,
                txn,
                generation: state.descriptor.generation() + 1,
                previous: Some(state.descriptor.tail()),
                types: self.registry.read().entries(),
                dictionary: keys.names().to_vec(),
                histogram: self
                    .histogram
                    .snapshot()
                    .promoted(&state.overlay, live_delta),
                puts,
                removals,
            };
            (fragment, next_durable)
        };

        let location = writer.append(
            txn,
            ControlFlags::FRAGMENT.union(ControlFlags::TXN_CLOSE),
            &fragment.encode()?,
        )?;
        writer.sync()?;

        let descriptor = Arc::new(Descriptor::new(location, &fragment, keys));
        {
            let mut state = self.state.write();
            state.durable = Arc::new(next_durable);
            state.overlay = Overlay::default();
            state.descriptor = Arc::clone(&descriptor);
            self.histogram.store(&fragment.histogram);
        }

        debug!(
            generation = fragment.generation,
            txn,
            puts = fragment.puts.len(),
            removals = fragment.removals.len(),
            fragment = %location,
            "flushed overlay"
        );
        Ok(descriptor)
    }

    /// Soft flush everything appended so far
    pub fn sync(&self) -> Result<u64> {
        let mut writer = self.writer.lock();
        self.ensure_open()?;
        writer.sync()
    }

    /// Stop accepting operations, drain readers, flush, and return the final
    /// fragment location
    pub fn close(&self) -> Result<FileLocation> {
        let mut writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::Closed);
        }

        let forced = self.readers.drain(self.config.drain_timeout());

        let txn = writer.open_txn().unwrap_or_else(|| writer.last_txn());
        let descriptor = self.flush_locked(&mut writer, txn)?;
        writer.sync()?;

        info!(
            path = %self.path.display(),
            tail = %descriptor.tail(),
            forced_readers = forced,
            "offset index closed"
        );
        Ok(descriptor.tail())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Read the `T` stored under `key`
    pub fn get<T: Storable>(&self, key: RecordKey) -> Result<Option<T>> {
        self.ensure_open()?;

        match self.registry.read().tag_of(T::KIND) {
            Some(tag) if tag == key.type_tag => {}
            _ => {
                return Err(StoreError::InvalidOperation(format!(
                    "key {} does not address records of type `{}`",
                    key,
                    T::KIND
                )))
            }
        }

        let (location, fresh) = match self.resolve(&key) {
            Some(found) => found,
            None => return Ok(None),
        };

        let checksums = self.checksums;
        self.read_location(location, fresh, |decoder| {
            decoder.decode_record::<T>(location, key, checksums)
        })
        .map(Some)
    }

    /// Read the undecoded body stored under `key`
    pub fn get_binary(&self, key: RecordKey) -> Result<Option<RawRecord>> {
        self.ensure_open()?;

        let (location, fresh) = match self.resolve(&key) {
            Some(found) => found,
            None => return Ok(None),
        };

        let checksums = self.checksums;
        self.read_location(location, fresh, |decoder| {
            let (format, body) = decoder.raw_record(location, key, checksums)?;
            Ok(RawRecord {
                location,
                format,
                body,
            })
        })
        .map(Some)
    }

    /// Whether `key` is visible (overlay first, then durable map)
    pub fn contains(&self, key: RecordKey) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.resolve(&key).is_some())
    }

    /// Location of `key` and whether it is only known to the overlay
    fn resolve(&self, key: &RecordKey) -> Option<(FileLocation, bool)> {
        let state = self.state.read();
        match state.overlay.lookup(key) {
            Lookup::Present(location) => Some((location, true)),
            Lookup::Removed => None,
            Lookup::Missing => state.durable.get(key).map(|location| (*location, false)),
        }
    }

    fn read_location<R>(
        &self,
        location: FileLocation,
        fresh: bool,
        decode: impl FnOnce(&RecordDecoder) -> Result<R>,
    ) -> Result<R> {
        self.soft_flush(location.end())?;

        let reader = self.readers.acquire()?;
        let mut decoder = self.decoders.acquire(&self.dictionary);

        let result = reader
            .read_at(location.offset, decoder.scratch_mut(location.length as usize))
            .and_then(|()| decode(&*decoder));

        match result {
            Err(e) if fresh => Err(StoreError::NotYetDurable {
                offset: location.offset,
                source: Box::new(e),
            }),
            other => other,
        }
    }

    /// Make bytes up to `upto` readable and durable, without promoting the overlay
    fn soft_flush(&self, upto: u64) -> Result<()> {
        if self.synced.load(Ordering::Acquire) >= upto {
            return Ok(());
        }

        let mut writer = self.writer.lock();
        if writer.synced_tail() < upto {
            let synced = writer.sync()?;
            debug!(upto, synced, "soft flush for read");
        }
        Ok(())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Live records, pending changes included
    pub fn len(&self) -> u64 {
        let state = self.state.read();
        let durable = state.durable.len() as i64;
        let pending: i64 = state.overlay.count_deltas().values().sum();
        (durable + pending).max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptor of the latest flush
    pub fn descriptor(&self) -> Arc<Descriptor> {
        Arc::clone(&self.state.read().descriptor)
    }

    pub fn stats(&self) -> IndexStats {
        let file_len = self.writer.lock().tail();
        let state = self.state.read();
        let histogram = self.histogram.snapshot();

        IndexStats {
            durable_counts: self.histogram.counts(),
            overlay_deltas: state
                .overlay
                .count_deltas()
                .iter()
                .filter(|(_, delta)| **delta != 0)
                .map(|(tag, delta)| (*tag, *delta))
                .collect(),
            type_names: self
                .registry
                .read()
                .entries()
                .into_iter()
                .map(|(name, tag)| (TypeTag(tag), name))
                .collect(),
            total_bytes: histogram.total_bytes,
            live_bytes: histogram.live_bytes,
            dead_bytes: file_len.saturating_sub(histogram.live_bytes),
            max_record_size: histogram.max_record_size,
            file_len,
            generation: state.descriptor.generation(),
            pending: state.overlay.len(),
        }
    }

    /// Soft flush, then scan the whole file
    pub fn verify(&self) -> Result<VerifyReport> {
        self.sync()?;
        Verifier::new(&self.path).checksums(self.checksums).scan()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether this file carries frame checksums
    pub fn checksums_enabled(&self) -> bool {
        self.checksums
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reader handles currently open (idle and lent)
    pub fn open_readers(&self) -> usize {
        self.readers.open_count()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Drop for OffsetIndex {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "close on drop failed");
        }
    }
}

impl fmt::Debug for OffsetIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffsetIndex")
            .field("path", &self.path)
            .field("checksums", &self.checksums)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn prepare_dir(config: &Config) -> Result<()> {
    let dir = &config.data_dir;
    if dir.exists() {
        if !dir.is_dir() {
            return Err(StoreError::InvalidPath {
                path: dir.clone(),
                reason: "not a directory".to_string(),
            });
        }
        return Ok(());
    }

    if !config.create_if_missing {
        return Err(StoreError::InvalidPath {
            path: dir.clone(),
            reason: "directory does not exist".to_string(),
        });
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Read one whole frame
fn read_frame(file: &mut File, location: FileLocation) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; location.length as usize];
    file.seek(SeekFrom::Start(location.offset))?;
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            StoreError::corrupted(location.offset, "fragment extends past end of file")
        }
        _ => StoreError::Io(e),
    })?;
    Ok(buf)
}

/// Walk the fragment chain backward from `last`; newest entry per key wins
fn load_chain(path: &Path, last: FileLocation, checksums: bool) -> Result<LoadedIndex> {
    let mut file = File::open(path)?;

    let mut durable = DurableMap::new();
    let mut seen: HashSet<RecordKey> = HashSet::new();
    let mut newest: Option<(FileLocation, IndexFragment)> = None;
    let mut next = Some(last);
    let mut walked = 0u64;

    while let Some(location) = next {
        let frame = read_frame(&mut file, location)?;
        let (header, payload) = decode_frame(location.offset, &frame, checksums)?;
        if !header.flags.is_fragment() {
            return Err(StoreError::corrupted(
                location.offset,
                "fragment chain points at a non-fragment frame",
            ));
        }

        let fragment = IndexFragment::decode(location.offset, payload)?;
        if let Some(previous) = fragment.previous {
            if previous.end() > location.offset {
                return Err(StoreError::corrupted(
                    location.offset,
                    format!("previous fragment {} does not precede this one", previous),
                ));
            }
        }

        for key in &fragment.removals {
            seen.insert(*key);
        }
        for (key, put) in &fragment.puts {
            if seen.insert(*key) {
                durable.insert(*key, *put);
            }
        }

        next = fragment.previous;
        walked += 1;
        if newest.is_none() {
            newest = Some((location, fragment));
        }
    }

    let (tail, fragment) = match newest {
        Some(found) => found,
        None => return Err(StoreError::corrupted(last.offset, "empty fragment chain")),
    };

    let dictionary =
        KeyDictionary::from_snapshot(DictionarySnapshot::from_names(fragment.dictionary.clone()));
    let descriptor = Descriptor::new(tail, &fragment, dictionary.snapshot());

    debug!(fragments = walked, records = durable.len(), "walked fragment chain");
    Ok(LoadedIndex {
        durable,
        registry: TypeRegistry::from_entries(fragment.types.iter().cloned()),
        dictionary,
        histogram: fragment.histogram,
        descriptor,
    })
}
