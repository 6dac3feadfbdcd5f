//! Record Framing Module
//!
//! Binary layout of one record in the index file.
//!
//! ## Responsibilities
//! - Length-prefixed frames that can be skipped without decoding
//! - Optional 64-bit checksum slot per frame
//! - Control flags marking transaction boundaries and index fragments
//! - A small file header that makes the file self-describing
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ File Header (16 bytes)                                       │
//! │   Magic "OFIX" (4) | Version u16 | Flags u16 | Origin (1)    │
//! │   | Reserved (7)                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Frame 1                                                      │
//! │ ┌─────────┬─────────┬──────────┬─────────┬─────────┬───────┐ │
//! │ │ Len (4) │Flags (1)│Origin (1)│ Txn (8) │ Payload │Sum (8)│ │
//! │ └─────────┴─────────┴──────────┴─────────┴─────────┴───────┘ │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Frame 2 ...                                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Len` counts the whole frame including itself. The checksum slot is only
//! present when the file header says so, and covers every byte between the
//! length field and the checksum slot. All integers are little-endian.

mod checksum;
mod header;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, StoreError};

pub use checksum::{compute_checksum, FrameHasher};
pub use header::{ControlFlags, FileHeader, FrameHeader, FORMAT_VERSION};

// =============================================================================
// Shared Constants
// =============================================================================

/// Frame head: Len (4) + Flags (1) + Origin (1) + Txn (8) = 14 bytes
pub const FRAME_HEADER_SIZE: usize = 14;

/// Checksum slot size when checksums are enabled
pub const CHECKSUM_SIZE: usize = 8;

/// Size of the file header preceding the first frame
pub const FILE_HEADER_SIZE: u64 = 16;

/// Upper bound on a single frame (1 GiB)
pub const MAX_FRAME_SIZE: u32 = 1 << 30;

/// Size of the trailing checksum slot for a file
pub fn checksum_size(checksums: bool) -> usize {
    if checksums {
        CHECKSUM_SIZE
    } else {
        0
    }
}

/// Smallest well-formed frame (empty payload)
pub fn min_frame_size(checksums: bool) -> usize {
    FRAME_HEADER_SIZE + checksum_size(checksums)
}

// =============================================================================
// Encoding / Decoding
// =============================================================================

/// Encode one frame around `payload`
pub fn encode_frame(
    flags: ControlFlags,
    origin: u8,
    txn: u64,
    payload: &[u8],
    checksums: bool,
) -> Result<BytesMut> {
    let total = min_frame_size(checksums) + payload.len();
    if total > MAX_FRAME_SIZE as usize {
        return Err(StoreError::InvalidOperation(format!(
            "frame of {} bytes exceeds maximum {}",
            total, MAX_FRAME_SIZE
        )));
    }

    let header = FrameHeader {
        length: total as u32,
        flags,
        origin,
        txn,
    };

    let mut buf = BytesMut::with_capacity(total);
    header.encode_into(&mut buf);
    buf.put_slice(payload);

    if checksums {
        let crc = compute_checksum(&buf[4..]);
        buf.put_u64_le(crc);
    }

    Ok(buf)
}

/// Validate a complete frame and return its header and payload
///
/// `offset` is only used for error reporting.
pub fn decode_frame(offset: u64, bytes: &[u8], checksums: bool) -> Result<(FrameHeader, &[u8])> {
    if bytes.len() < min_frame_size(checksums) {
        return Err(StoreError::corrupted(
            offset,
            format!("frame too short: {} bytes", bytes.len()),
        ));
    }

    let header = FrameHeader::decode(bytes);
    let length = header.length as usize;

    if length < min_frame_size(checksums) {
        return Err(StoreError::corrupted(
            offset,
            format!("invalid frame length {}", length),
        ));
    }
    if length != bytes.len() {
        return Err(StoreError::corrupted(
            offset,
            format!("frame length {} does not match {} bytes read", length, bytes.len()),
        ));
    }

    let payload_end = length - checksum_size(checksums);

    if checksums {
        let stored = u64::from_le_bytes(read_8(bytes, payload_end));
        let computed = compute_checksum(&bytes[4..payload_end]);
        if stored != computed {
            return Err(StoreError::corrupted(
                offset,
                format!(
                    "checksum mismatch: stored {:016x}, computed {:016x}",
                    stored, computed
                ),
            ));
        }
    }

    Ok((header, &bytes[FRAME_HEADER_SIZE..payload_end]))
}

pub(crate) fn read_8(bytes: &[u8], at: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[at..at + 8]);
    out
}
