//! Configuration for offsetstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for an OffsetIndex instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the index file
    /// Internal structure:
    ///   {data_dir}/
    ///     └── offsets.oix      (frames + index fragments)
    pub data_dir: PathBuf,

    /// Name of the index file inside `data_dir`
    pub file_name: String,

    /// Create `data_dir` and the index file when they do not exist
    pub create_if_missing: bool,

    // -------------------------------------------------------------------------
    // Write Path Configuration
    // -------------------------------------------------------------------------
    /// Whether newly created files carry a checksum slot per frame
    pub checksums: bool,

    /// Capacity of the writer's output buffer (in bytes)
    pub write_buffer_size: usize,

    /// Origin/node id stamped into every frame
    pub origin_id: u8,

    /// Extra fsyncs on top of flush and soft flush
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Read Path Configuration
    // -------------------------------------------------------------------------
    /// Max concurrently open reader handles
    pub max_readers: usize,

    /// How long a reader waits for a free handle (milliseconds)
    pub pool_wait_timeout_ms: u64,

    /// How long close() waits for borrowed handles before force-closing them (milliseconds)
    pub drain_timeout_ms: u64,

    /// Recompute every frame checksum while opening an existing file
    pub verify_checksums_on_open: bool,
}

/// Sync strategy: how often the writer fsyncs outside of flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Only flush and soft flush sync (fastest)
    OnFlush,

    /// fsync after every appended frame (safest, slowest)
    EveryWrite,

    /// fsync after N appended frames
    EveryNRecords { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./offsetstore_data"),
            file_name: "offsets.oix".to_string(),
            create_if_missing: true,
            checksums: true,
            write_buffer_size: 64 * 1024, // 64 KB
            origin_id: 0,
            sync_strategy: SyncStrategy::OnFlush,
            max_readers: 16,
            pool_wait_timeout_ms: 5000,
            drain_timeout_ms: 2000,
            verify_checksums_on_open: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Full path of the index file
    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    pub fn pool_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_wait_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the index file name
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.config.file_name = name.into();
        self
    }

    /// Set whether missing directories/files are created
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.config.create_if_missing = value;
        self
    }

    /// Enable or disable frame checksums for new files
    pub fn checksums(mut self, value: bool) -> Self {
        self.config.checksums = value;
        self
    }

    /// Set the writer output buffer size (in bytes)
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Set the origin/node id
    pub fn origin_id(mut self, id: u8) -> Self {
        self.config.origin_id = id;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the maximum number of concurrently open reader handles
    pub fn max_readers(mut self, count: usize) -> Self {
        self.config.max_readers = count;
        self
    }

    /// Set the reader-handle wait timeout (in milliseconds)
    pub fn pool_wait_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pool_wait_timeout_ms = ms;
        self
    }

    /// Set the shutdown drain timeout (in milliseconds)
    pub fn drain_timeout_ms(mut self, ms: u64) -> Self {
        self.config.drain_timeout_ms = ms;
        self
    }

    /// Recompute checksums of every frame while opening
    pub fn verify_checksums_on_open(mut self, value: bool) -> Self {
        self.config.verify_checksums_on_open = value;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
