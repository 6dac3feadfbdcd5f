//! The storable-part contract and versioned decoding

use bytes::BytesMut;

use crate::error::{Result, StoreError};

use super::{DictionarySnapshot, KeyDictionary};

/// Identifies one on-disk encoding of a record type
pub type FormatId = u16;

/// Decoder for one format of `T`
pub type DecodeFn<T> = fn(&[u8], &DictionarySnapshot) -> Result<T>;

/// A payload that can be stored in the offset index
///
/// `KIND` is resolved to a stable type tag through the registry; `FORMAT`
/// is written next to every record so older encodings stay readable.
pub trait Storable: Sized + Send + 'static {
    /// Registry name of this record type
    const KIND: &'static str;

    /// Format id written by `encode`
    const FORMAT: FormatId;

    /// Unique part identifier (primary key)
    fn part_id(&self) -> u64;

    /// Accept the part identifier read back from the record prefix
    fn set_part_id(&mut self, id: u64);

    /// Append the current-format body to `out`, interning keys as needed
    fn encode(&self, out: &mut BytesMut, keys: &KeyDictionary) -> Result<()>;

    /// Decode a current-format body
    fn decode(body: &[u8], keys: &DictionarySnapshot) -> Result<Self>;

    /// Decoders for formats written by earlier releases
    fn compatible_decoders() -> Vec<(FormatId, DecodeFn<Self>)> {
        Vec::new()
    }
}

/// Decode `body` written with `format`, falling back to a compatible decoder
pub fn decode_versioned<T: Storable>(
    format: FormatId,
    body: &[u8],
    keys: &DictionarySnapshot,
) -> Result<T> {
    if format == T::FORMAT {
        return T::decode(body, keys);
    }

    let fallback = T::compatible_decoders()
        .into_iter()
        .find(|(id, _)| *id == format)
        .map(|(_, decode)| decode);

    match fallback {
        Some(decode) => decode(body, keys),
        None => Err(StoreError::VersionNotSupported {
            kind: T::KIND.to_string(),
            requested: format,
            supported: supported_formats::<T>(),
        }),
    }
}

/// Current format first, then every registered compatible format
pub fn supported_formats<T: Storable>() -> Vec<FormatId> {
    let mut formats = vec![T::FORMAT];
    formats.extend(T::compatible_decoders().into_iter().map(|(id, _)| id));
    formats
}
