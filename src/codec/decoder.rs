//! Pooled record decoders
//!
//! A `RecordDecoder` owns a scratch buffer and is bound to one dictionary
//! snapshot. Decoders are recycled through a lock-free queue; one tagged with
//! an older dictionary generation is dropped instead of reused, so a decoder
//! never resolves key ids against a dictionary that lacks them.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::frame::{decode_frame, FrameHeader};
use crate::index::{FileLocation, RecordKey};

use super::{decode_versioned, DictionarySnapshot, FormatId, KeyDictionary, RecordPrefix, Storable};

/// Decoder instance: scratch buffer + the dictionary it was built against
pub struct RecordDecoder {
    generation: u64,
    keys: Arc<DictionarySnapshot>,
    scratch: Vec<u8>,
}

impl RecordDecoder {
    pub fn new(keys: Arc<DictionarySnapshot>) -> Self {
        Self {
            generation: keys.version(),
            keys,
            scratch: Vec::new(),
        }
    }

    /// Dictionary version this decoder resolves keys against
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn keys(&self) -> &DictionarySnapshot {
        &self.keys
    }

    /// Scratch buffer sized for one frame of `len` bytes
    pub fn scratch_mut(&mut self, len: usize) -> &mut [u8] {
        self.scratch.resize(len, 0);
        &mut self.scratch
    }

    /// Validate the frame in the scratch buffer
    pub fn frame(&self, location: FileLocation, checksums: bool) -> Result<(FrameHeader, &[u8])> {
        decode_frame(location.offset, &self.scratch, checksums)
    }

    /// Decode the data record in the scratch buffer as `T`
    pub fn decode_record<T: Storable>(
        &self,
        location: FileLocation,
        expected: RecordKey,
        checksums: bool,
    ) -> Result<T> {
        let (prefix, body) = self.data_payload(location, expected, checksums)?;
        let mut value = decode_versioned::<T>(prefix.format, body, &self.keys)?;
        value.set_part_id(prefix.id);
        Ok(value)
    }

    /// Copy out the undecoded body of the data record in the scratch buffer
    pub fn raw_record(
        &self,
        location: FileLocation,
        expected: RecordKey,
        checksums: bool,
    ) -> Result<(FormatId, Bytes)> {
        let (prefix, body) = self.data_payload(location, expected, checksums)?;
        Ok((prefix.format, Bytes::copy_from_slice(body)))
    }

    fn data_payload(
        &self,
        location: FileLocation,
        expected: RecordKey,
        checksums: bool,
    ) -> Result<(RecordPrefix, &[u8])> {
        let (header, payload) = self.frame(location, checksums)?;
        if !header.flags.is_data() {
            return Err(StoreError::corrupted(
                location.offset,
                format!("expected a data frame, found flags {:#04x}", header.flags.as_byte()),
            ));
        }

        let (prefix, body) = RecordPrefix::decode(location.offset, payload)?;
        if prefix.key() != expected {
            return Err(StoreError::corrupted(
                location.offset,
                format!("record key {} does not match index key {}", prefix.key(), expected),
            ));
        }

        Ok((prefix, body))
    }
}

// =============================================================================
// Decoder Pool
// =============================================================================

/// Bounded pool of reusable decoders
pub struct DecoderPool {
    idle: ArrayQueue<RecordDecoder>,
    created: AtomicU64,
    discarded: AtomicU64,
}

impl DecoderPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: ArrayQueue::new(capacity.max(1)),
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Borrow a decoder matching the dictionary's current version
    pub fn acquire<'a>(&'a self, keys: &'a KeyDictionary) -> PooledDecoder<'a> {
        let current = keys.version();

        while let Some(decoder) = self.idle.pop() {
            if decoder.generation == current {
                return PooledDecoder::new(self, keys, decoder);
            }
            self.discard(&decoder, current);
        }

        self.created.fetch_add(1, Ordering::Relaxed);
        PooledDecoder::new(self, keys, RecordDecoder::new(keys.snapshot()))
    }

    fn release(&self, decoder: RecordDecoder, current: u64) {
        if decoder.generation != current {
            self.discard(&decoder, current);
            return;
        }
        // Pool full: the decoder is simply dropped
        let _ = self.idle.push(decoder);
    }

    fn discard(&self, decoder: &RecordDecoder, current: u64) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        debug!(
            stale = decoder.generation,
            current, "discarding decoder built against an older dictionary"
        );
    }

    /// Decoders waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Decoders created so far
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Decoders dropped because their dictionary generation was stale
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

/// A borrowed decoder; returned to the pool on drop, error paths included
pub struct PooledDecoder<'a> {
    pool: &'a DecoderPool,
    keys: &'a KeyDictionary,
    decoder: Option<RecordDecoder>,
}

impl<'a> PooledDecoder<'a> {
    fn new(pool: &'a DecoderPool, keys: &'a KeyDictionary, decoder: RecordDecoder) -> Self {
        Self {
            pool,
            keys,
            decoder: Some(decoder),
        }
    }
}

impl Deref for PooledDecoder<'_> {
    type Target = RecordDecoder;

    fn deref(&self) -> &RecordDecoder {
        self.decoder.as_ref().expect("decoder present until drop")
    }
}

impl DerefMut for PooledDecoder<'_> {
    fn deref_mut(&mut self) -> &mut RecordDecoder {
        self.decoder.as_mut().expect("decoder present until drop")
    }
}

impl Drop for PooledDecoder<'_> {
    fn drop(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            self.pool.release(decoder, self.keys.version());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoders_are_reused_within_a_generation() {
        let keys = KeyDictionary::new();
        let pool = DecoderPool::new(4);

        drop(pool.acquire(&keys));
        drop(pool.acquire(&keys));

        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn stale_decoder_is_discarded_on_return() {
        let keys = KeyDictionary::new();
        let pool = DecoderPool::new(4);

        let decoder = pool.acquire(&keys);
        assert_eq!(decoder.generation(), 0);
        keys.intern("new_field").unwrap();
        drop(decoder);

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.discarded(), 1);

        let fresh = pool.acquire(&keys);
        assert_eq!(fresh.generation(), 1);
        assert_eq!(fresh.keys().resolve(0), Some("new_field"));
    }

    #[test]
    fn stale_idle_decoder_is_skipped_on_acquire() {
        let keys = KeyDictionary::new();
        let pool = DecoderPool::new(4);

        drop(pool.acquire(&keys));
        keys.intern("k").unwrap();

        let decoder = pool.acquire(&keys);
        assert_eq!(decoder.generation(), 1);
        assert_eq!(pool.discarded(), 1);
        assert_eq!(pool.created(), 2);
    }
}
