//! Frame and file headers

use bytes::{BufMut, BytesMut};

use crate::error::{Result, StoreError};

use super::{read_8, FILE_HEADER_SIZE, FRAME_HEADER_SIZE};

/// Magic bytes identifying an offset index file
const MAGIC: &[u8; 4] = b"OFIX";

/// Current file format version
pub const FORMAT_VERSION: u16 = 1;

/// Header flag: frames carry a checksum slot
const HEADER_FLAG_CHECKSUMS: u16 = 0x0001;

// =============================================================================
// Control Flags
// =============================================================================

/// Control flags stored in byte 4 of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlFlags(u8);

impl ControlFlags {
    /// No flags set (plain data frame inside an open transaction)
    pub const NONE: Self = Self(0);
    /// Last frame of its transaction block
    pub const TXN_CLOSE: Self = Self(0x01);
    /// Frame payload is a persisted index fragment
    pub const FRAGMENT: Self = Self(0x02);
    /// Empty frame that only closes the open transaction block
    pub const MARKER: Self = Self(0x04);

    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    pub const fn as_byte(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn closes_transaction(self) -> bool {
        self.0 & Self::TXN_CLOSE.0 != 0
    }

    pub const fn is_fragment(self) -> bool {
        self.0 & Self::FRAGMENT.0 != 0
    }

    pub const fn is_marker(self) -> bool {
        self.0 & Self::MARKER.0 != 0
    }

    /// Neither a fragment nor a marker
    pub const fn is_data(self) -> bool {
        !self.is_fragment() && !self.is_marker()
    }
}

// =============================================================================
// Frame Header
// =============================================================================

/// Fixed head of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame length including this field and the checksum slot
    pub length: u32,
    pub flags: ControlFlags,
    pub origin: u8,
    pub txn: u64,
}

impl FrameHeader {
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.length);
        buf.put_u8(self.flags.as_byte());
        buf.put_u8(self.origin);
        buf.put_u64_le(self.txn);
    }

    /// Parse the first 14 bytes of `bytes`
    ///
    /// Callers guarantee at least FRAME_HEADER_SIZE bytes.
    pub fn decode(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= FRAME_HEADER_SIZE);
        Self {
            length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            flags: ControlFlags::from_byte(bytes[4]),
            origin: bytes[5],
            txn: u64::from_le_bytes(read_8(bytes, 6)),
        }
    }
}

// =============================================================================
// File Header
// =============================================================================

/// Header written once when the file is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    pub checksums: bool,
    pub origin: u8,
}

impl FileHeader {
    pub fn new(checksums: bool, origin: u8) -> Self {
        Self {
            version: FORMAT_VERSION,
            checksums,
            origin,
        }
    }

    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        let flags = if self.checksums { HEADER_FLAG_CHECKSUMS } else { 0 };
        buf[6..8].copy_from_slice(&flags.to_le_bytes());
        buf[8] = self.origin;
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_SIZE as usize {
            return Err(StoreError::corrupted(0, "file header truncated"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(StoreError::corrupted(
                0,
                format!("invalid magic: expected OFIX, got {:?}", &bytes[0..4]),
            ));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(StoreError::corrupted(
                0,
                format!("unsupported file format version {}", version),
            ));
        }

        let flags = u16::from_le_bytes([bytes[6], bytes[7]]);

        Ok(Self {
            version,
            checksums: flags & HEADER_FLAG_CHECKSUMS != 0,
            origin: bytes[8],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_flags() {
        let flags = ControlFlags::FRAGMENT.union(ControlFlags::TXN_CLOSE);
        assert!(flags.is_fragment());
        assert!(flags.closes_transaction());
        assert!(!flags.is_marker());
        assert!(!flags.is_data());
        assert!(ControlFlags::NONE.is_data());
    }

    #[test]
    fn file_header_rejects_bad_magic() {
        let mut bytes = FileHeader::new(true, 3).encode();
        bytes[0] = b'X';
        assert!(FileHeader::decode(&bytes).is_err());
    }

    #[test]
    fn file_header_keeps_checksum_bit() {
        let header = FileHeader::decode(&FileHeader::new(false, 9).encode()).unwrap();
        assert!(!header.checksums);
        assert_eq!(header.origin, 9);
    }
}
