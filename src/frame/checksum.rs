//! Frame checksums
//!
//! The checksum slot holds a 64-bit XXH3 of the frame body.

use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// Checksum of a frame body (everything between the length field and the slot)
pub fn compute_checksum(body: &[u8]) -> u64 {
    xxh3_64(body)
}

/// Streaming checksum over a frame body read in chunks
#[derive(Default)]
pub struct FrameHasher {
    inner: Xxh3,
}

impl FrameHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finish(self) -> u64 {
        self.inner.digest()
    }
}
