//! # offsetstore
//!
//! An append-only, crash-consistent record store with:
//! - One growing file of length-prefixed, checksummed frames
//! - An in-memory key → location index with a write-behind overlay
//! - Single-writer/multi-reader concurrency with a bounded reader pool
//! - Versioned record codecs with backward-compatible fallback decoders
//! - Index fragments persisted in the same file for bootstrap and recovery
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        OffsetIndex                          │
//! │          put / remove / flush        get / get_binary       │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!   ┌─────────────────────┐        ┌─────────────────────────┐
//!   │    RecordWriter     │        │ Overlay → Durable map   │
//!   │ (Mutex, BufWriter)  │        │       (RwLock)          │
//!   └──────────┬──────────┘        └────────────┬────────────┘
//!              │ append                         │ FileLocation
//!              ▼                                ▼
//!   ┌─────────────────────┐        ┌─────────────────────────┐
//!   │     Index file      │◄───────│ ReaderPool + DecoderPool│
//!   │ frames + fragments  │  read  │   (bounded, pooled)     │
//!   └─────────────────────┘        └─────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod frame;
pub mod codec;
pub mod index;
pub mod io;
pub mod verify;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{Config, SyncStrategy};
pub use codec::{Document, Storable, Value};
pub use engine::{IndexStats, OffsetIndex, RawRecord};
pub use index::{Descriptor, FileLocation, RecordKey, TypeTag};
pub use verify::{Verifier, VerifyReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of offsetstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
