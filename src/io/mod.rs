//! File I/O Module
//!
//! The two sides of the index file.
//!
//! ## Responsibilities
//! - One exclusive writer that appends frames through a buffer
//! - A bounded pool of read handles for concurrent random access
//!
//! ## Access Pattern
//! ```text
//!   put/remove/flush ──► Mutex<RecordWriter> ──► BufWriter ──► file tail
//!
//!   get ──► ReaderPool::acquire ──► PooledReader::read_at(offset)
//!              │ (waits while `capacity` handles are lent)
//!              └── handle returned on drop
//! ```

mod reader;
mod writer;

pub use reader::{PooledReader, ReaderPool};
pub use writer::{RecordWriter, WriterResume};
