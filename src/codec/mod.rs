//! Codec Module
//!
//! Versioned (de)serialization of record payloads.
//!
//! ## Responsibilities
//! - Stable small-integer tags for record types (`TypeRegistry`)
//! - Compact ids for string keys used inside payloads (`KeyDictionary`)
//! - Current encoder/decoder per type plus a `{format id -> decoder}` table
//!   for formats written by older releases (`Storable`)
//! - Pooled, generation-tagged decoders for the read path (`DecoderPool`)
//!
//! ## Data Payload Layout
//! ```text
//! ┌──────────────┬───────────────┬──────────────┬──────────────┐
//! │ Type tag (2) │ Format id (2) │ Part id (8)  │ Body         │
//! └──────────────┴───────────────┴──────────────┴──────────────┘
//! ```

mod decoder;
mod dictionary;
mod document;
mod registry;
mod storable;

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::index::{RecordKey, TypeTag};

pub use decoder::{DecoderPool, PooledDecoder, RecordDecoder};
pub use dictionary::{DictionarySnapshot, KeyDictionary};
pub use document::{Document, Value};
pub use registry::TypeRegistry;
pub use storable::{decode_versioned, supported_formats, DecodeFn, FormatId, Storable};

/// Type tag (2) + format id (2) + part id (8)
pub const RECORD_PREFIX_SIZE: usize = 12;

/// Leading fields of every data payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPrefix {
    pub type_tag: TypeTag,
    pub format: FormatId,
    pub id: u64,
}

impl RecordPrefix {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.type_tag, self.id)
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.type_tag.0);
        buf.put_u16_le(self.format);
        buf.put_u64_le(self.id);
    }

    /// Split a data payload into its prefix and body
    pub fn decode(offset: u64, payload: &[u8]) -> Result<(Self, &[u8])> {
        if payload.len() < RECORD_PREFIX_SIZE {
            return Err(StoreError::corrupted(
                offset,
                format!("data payload too short: {} bytes", payload.len()),
            ));
        }

        let prefix = Self {
            type_tag: TypeTag(u16::from_le_bytes([payload[0], payload[1]])),
            format: u16::from_le_bytes([payload[2], payload[3]]),
            id: u64::from_le_bytes(crate::frame::read_8(payload, 4)),
        };

        Ok((prefix, &payload[RECORD_PREFIX_SIZE..]))
    }
}

// =============================================================================
// Bincode Helpers
// =============================================================================

/// Append the bincode encoding of `value` to `out`
pub fn write_bincode<T: Serialize + ?Sized>(value: &T, out: &mut BytesMut) -> Result<()> {
    bincode::serialize_into(out.writer(), value)?;
    Ok(())
}

/// Decode a bincode value occupying all of `bytes`
pub fn read_bincode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
