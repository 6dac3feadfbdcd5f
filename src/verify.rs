//! Consistency Verifier
//!
//! Read-only sequential scan of an index file, used at startup and by the
//! CLI's `verify` command.
//!
//! ## Checks per frame
//! ```text
//!   length     ≥ minimum frame, ≤ MAX_FRAME_SIZE, within the file
//!   checksum   recomputed over bytes [4, len - 8) when enabled
//!   txn id     never decreases; constant while a block is open
//!   flags      markers are empty and close their block,
//!              fragments close their block, data carries a record prefix
//! ```
//!
//! Payloads are skipped by length. Only the record prefix of data frames is
//! read, unless checksums are being verified.
//!
//! A final frame that runs past end-of-file is reported as a torn tail
//! rather than an error: it is what a crash between append and fsync
//! leaves behind. The length field is outside the checksum, so before
//! accepting a torn tail the rest of the file is searched for a complete
//! index fragment. Fragments are synced along with everything before them,
//! so finding one means the short frame is damage, not a crash.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::codec::{RecordPrefix, RECORD_PREFIX_SIZE};
use crate::error::{Result, StoreError};
use crate::frame::{
    checksum_size, decode_frame, min_frame_size, read_8, ControlFlags, FileHeader, FrameHasher,
    FrameHeader, FILE_HEADER_SIZE, FORMAT_VERSION, FRAME_HEADER_SIZE, MAX_FRAME_SIZE,
};
use crate::index::{FileLocation, IndexFragment, TypeTag};

/// Read size while searching past a short frame for a later fragment
const SEARCH_CHUNK: usize = 64 * 1024;

/// One frame as seen by the scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Zero-based position of the frame in the file
    pub sequence: u64,
    pub location: FileLocation,
    pub flags: ControlFlags,
    pub origin: u8,
    pub txn: u64,
    /// Record prefix, for data frames
    pub record: Option<RecordPrefix>,
}

/// Data frames seen for one record type, overwritten ones included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeTally {
    pub records: u64,
    pub bytes: u64,
}

/// Result of a full scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// The file header declares a checksum slot
    pub checksums_enabled: bool,
    /// Checksums were recomputed during this scan
    pub checksums_verified: bool,
    pub frames: u64,
    pub data_records: u64,
    pub fragments: u64,
    pub markers: u64,
    pub per_type: BTreeMap<TypeTag, TypeTally>,
    pub data_bytes: u64,
    pub last_txn: Option<u64>,
    /// Transaction left open by the last frame
    pub open_txn: Option<u64>,
    pub last_fragment: Option<FileLocation>,
    /// End of the last complete frame
    pub end_offset: u64,
    /// Offset of an incomplete final frame
    pub torn_tail: Option<u64>,
    pub file_len: u64,
}

impl VerifyReport {
    /// No torn tail; every byte belongs to a complete frame
    pub fn is_clean(&self) -> bool {
        self.torn_tail.is_none()
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "file length:      {}", self.file_len)?;
        writeln!(
            f,
            "checksums:        {}",
            match (self.checksums_enabled, self.checksums_verified) {
                (false, _) => "disabled",
                (true, false) => "present, not verified",
                (true, true) => "verified",
            }
        )?;
        writeln!(f, "frames:           {}", self.frames)?;
        writeln!(f, "  data records:   {}", self.data_records)?;
        writeln!(f, "  fragments:      {}", self.fragments)?;
        writeln!(f, "  markers:        {}", self.markers)?;
        writeln!(f, "data bytes:       {}", self.data_bytes)?;
        for (tag, tally) in &self.per_type {
            writeln!(f, "  type {}: {} records, {} bytes", tag, tally.records, tally.bytes)?;
        }
        match self.last_txn {
            Some(txn) => writeln!(f, "last txn:         {}", txn)?,
            None => writeln!(f, "last txn:         -")?,
        }
        if let Some(txn) = self.open_txn {
            writeln!(f, "open txn:         {}", txn)?;
        }
        if let Some(location) = self.last_fragment {
            writeln!(f, "last fragment:    {}", location)?;
        }
        writeln!(f, "end offset:       {}", self.end_offset)?;
        match self.torn_tail {
            Some(offset) => write!(f, "torn tail at:     {}", offset),
            None => write!(f, "torn tail:        none"),
        }
    }
}

/// Sequential scanner over one index file
#[derive(Debug, Clone)]
pub struct Verifier {
    path: PathBuf,
    verify_checksums: bool,
}

impl Verifier {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            verify_checksums: true,
        }
    }

    /// Recompute frame checksums (when the file has them); on by default
    pub fn checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn scan(&self) -> Result<VerifyReport> {
        self.scan_frames(|_| {})
    }

    /// Scan the file, handing every complete frame to `visit`
    pub fn scan_frames<F>(&self, mut visit: F) -> Result<VerifyReport>
    where
        F: FnMut(&FrameInfo),
    {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        if file_len < FILE_HEADER_SIZE {
            return Err(StoreError::corrupted(0, "file header truncated"));
        }
        let mut header_bytes = [0u8; FILE_HEADER_SIZE as usize];
        reader.read_exact(&mut header_bytes)?;
        let header = FileHeader::decode(&header_bytes)?;

        let checksums = header.checksums;
        let verify = checksums && self.verify_checksums;
        let min_len = min_frame_size(checksums) as u64;

        let mut report = VerifyReport {
            checksums_enabled: checksums,
            checksums_verified: verify,
            file_len,
            end_offset: FILE_HEADER_SIZE,
            ..Default::default()
        };

        let mut offset = FILE_HEADER_SIZE;
        let mut sequence = 0u64;
        let mut head = [0u8; FRAME_HEADER_SIZE];
        let mut frame = Vec::new();

        while offset < file_len {
            let remaining = file_len - offset;
            if remaining < FRAME_HEADER_SIZE as u64 {
                report.torn_tail = Some(offset);
                break;
            }

            reader.read_exact(&mut head)?;
            let fh = FrameHeader::decode(&head);
            let length = u64::from(fh.length);

            if length < min_len || fh.length > MAX_FRAME_SIZE {
                return Err(StoreError::corrupted_at(
                    offset,
                    sequence,
                    format!("invalid frame length {}", length),
                ));
            }
            if length > remaining {
                let last_txn = report.last_txn.unwrap_or(0);
                if let Some(found) =
                    find_fragment(&self.path, offset, file_len, checksums, last_txn)?
                {
                    return Err(StoreError::corrupted_at(
                        offset,
                        sequence,
                        format!(
                            "frame length {} runs past end of file, index fragment follows at {}",
                            length, found
                        ),
                    ));
                }
                report.torn_tail = Some(offset);
                break;
            }

            let payload_len = (length - min_len) as usize;
            let mut record = None;

            if verify {
                frame.clear();
                frame.extend_from_slice(&head);
                frame.resize(length as usize, 0);
                reader.read_exact(&mut frame[FRAME_HEADER_SIZE..])?;

                let payload_end = length as usize - checksum_size(true);
                let mut hasher = FrameHasher::new();
                hasher.update(&frame[4..payload_end]);
                let computed = hasher.finish();
                let stored = u64::from_le_bytes(read_8(&frame, payload_end));
                if stored != computed {
                    return Err(StoreError::corrupted_at(
                        offset,
                        sequence,
                        format!(
                            "checksum mismatch: stored {:016x}, computed {:016x}",
                            stored, computed
                        ),
                    ));
                }

                if fh.flags.is_data() && payload_len >= RECORD_PREFIX_SIZE {
                    let payload = &frame[FRAME_HEADER_SIZE..payload_end];
                    record = Some(RecordPrefix::decode(offset, payload)?.0);
                }
            } else {
                let mut skip = (length - FRAME_HEADER_SIZE as u64) as i64;
                if fh.flags.is_data() && payload_len >= RECORD_PREFIX_SIZE {
                    let mut prefix = [0u8; RECORD_PREFIX_SIZE];
                    reader.read_exact(&mut prefix)?;
                    record = Some(RecordPrefix::decode(offset, &prefix)?.0);
                    skip -= RECORD_PREFIX_SIZE as i64;
                }
                reader.seek_relative(skip)?;
            }

            check_flags(offset, sequence, fh.flags, payload_len)?;
            check_ordering(offset, sequence, &report, fh.txn)?;

            let location = FileLocation::new(offset, fh.length);
            if fh.flags.is_fragment() {
                report.fragments += 1;
                report.last_fragment = Some(location);
            } else if fh.flags.is_marker() {
                report.markers += 1;
            } else if let Some(prefix) = record {
                report.data_records += 1;
                report.data_bytes += length;
                let tally = report.per_type.entry(prefix.type_tag).or_default();
                tally.records += 1;
                tally.bytes += length;
            }

            report.frames += 1;
            report.last_txn = Some(fh.txn);
            report.open_txn = if fh.flags.closes_transaction() {
                None
            } else {
                Some(fh.txn)
            };

            visit(&FrameInfo {
                sequence,
                location,
                flags: fh.flags,
                origin: fh.origin,
                txn: fh.txn,
                record,
            });

            offset += length;
            report.end_offset = offset;
            sequence += 1;
        }

        debug!(
            path = %self.path.display(),
            frames = report.frames,
            end = report.end_offset,
            torn_tail = ?report.torn_tail,
            "verifier scan complete"
        );
        Ok(report)
    }
}

/// First complete index fragment that starts after `from`
///
/// A candidate needs a fragment header with a txn no older than `last_txn`,
/// a length that fits the file, a valid checksum (when the file has them)
/// and a readable fragment body whose previous pointer lies before it.
fn find_fragment(
    path: &Path,
    from: u64,
    file_len: u64,
    checksums: bool,
    last_txn: u64,
) -> Result<Option<u64>> {
    let mut file = File::open(path)?;
    let mut frames = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;

    let min_len = min_frame_size(checksums) as u64;
    let mut window: Vec<u8> = Vec::new();
    let mut window_start = from;
    let mut chunk = vec![0u8; SEARCH_CHUNK];

    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            return Ok(None);
        }
        window.extend_from_slice(&chunk[..read]);

        let mut pos = 0;
        while pos + FRAME_HEADER_SIZE <= window.len() {
            let candidate = window_start + pos as u64;
            let fh = FrameHeader::decode(&window[pos..pos + FRAME_HEADER_SIZE]);
            let length = u64::from(fh.length);

            let plausible = candidate > from
                && fh.flags.is_fragment()
                && fh.flags.closes_transaction()
                && !fh.flags.is_marker()
                && fh.txn >= last_txn
                && length >= min_len
                && fh.length <= MAX_FRAME_SIZE
                && candidate + length <= file_len;

            if plausible && is_fragment_frame(&mut frames, candidate, length, checksums)? {
                return Ok(Some(candidate));
            }
            pos += 1;
        }

        window.drain(..pos);
        window_start += pos as u64;
    }
}

fn is_fragment_frame(file: &mut File, offset: u64, length: u64, checksums: bool) -> Result<bool> {
    let mut frame = vec![0u8; length as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut frame)?;

    let payload = match decode_frame(offset, &frame, checksums) {
        Ok((_, payload)) => payload,
        Err(_) => return Ok(false),
    };
    Ok(match IndexFragment::decode(offset, payload) {
        Ok(fragment) => {
            fragment.format == FORMAT_VERSION
                && fragment.previous.map_or(true, |previous| previous.end() <= offset)
        }
        Err(_) => false,
    })
}

fn check_flags(offset: u64, sequence: u64, flags: ControlFlags, payload_len: usize) -> Result<()> {
    if flags.is_fragment() && flags.is_marker() {
        return Err(StoreError::corrupted_at(
            offset,
            sequence,
            "frame flagged as both fragment and marker",
        ));
    }
    if flags.is_marker() && (payload_len != 0 || !flags.closes_transaction()) {
        return Err(StoreError::corrupted_at(
            offset,
            sequence,
            "marker frame must be empty and close its transaction",
        ));
    }
    if flags.is_fragment() && !flags.closes_transaction() {
        return Err(StoreError::corrupted_at(
            offset,
            sequence,
            "index fragment does not close its transaction",
        ));
    }
    if flags.is_data() && payload_len < RECORD_PREFIX_SIZE {
        return Err(StoreError::corrupted_at(
            offset,
            sequence,
            format!("data frame payload of {} bytes has no record prefix", payload_len),
        ));
    }
    Ok(())
}

fn check_ordering(offset: u64, sequence: u64, report: &VerifyReport, txn: u64) -> Result<()> {
    if let Some(open) = report.open_txn {
        if txn != open {
            return Err(StoreError::corrupted_at(
                offset,
                sequence,
                format!("transaction id {} inside open transaction {}", txn, open),
            ));
        }
    }
    if let Some(last) = report.last_txn {
        if txn < last {
            return Err(StoreError::corrupted_at(
                offset,
                sequence,
                format!("transaction id {} after {}", txn, last),
            ));
        }
    }
    Ok(())
}
