//! COW log file and record format.
//!
//! A partition's COW log is a single file named `<partition>.cow`.
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Log Header (32 bytes)              │
//! ├────────────────────────────────────┤
//! │ Record 1                           │
//! ├────────────────────────────────────┤
//! │ Record 2                           │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────┬──────────┬───────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver(1)│ Kind (1) │ Body (variable)   │ CRC32 (4)│
//! └─────────────────┴──────────────┴──────────┴───────────────────┴──────────┘
//!
//! Bodies:
//!   Copy    = source_block (8) + dest_block (8)
//!   Replace = dest_block (8) + block bytes (block_size)
//!   Zero    = dest_block (8)
//!   Label   = next_op_index (8)
//!   Footer  = entry_count (8)
//! ```
//!
//! The length field covers everything after itself (version, kind, body, CRC).

use crc32fast::Hasher;
use deltacow_core::{CowEntry, MAX_BLOCK_SIZE};

/// Magic bytes identifying a COW log file: "DCOW"
pub const COW_MAGIC: [u8; 4] = *b"DCOW";

/// Current log file format version
pub const COW_LOG_FORMAT_VERSION: u32 = 1;

/// Size of the log header in bytes
pub const COW_HEADER_SIZE: usize = 32;

/// Current record format version
pub const COW_RECORD_FORMAT_VERSION: u8 = 1;

/// Largest value the length field may hold.
pub const MAX_RECORD_LEN: usize = MAX_BLOCK_SIZE as usize + 64;

const KIND_COPY: u8 = 1;
const KIND_REPLACE: u8 = 2;
const KIND_ZERO: u8 = 3;
const KIND_LABEL: u8 = 4;
const KIND_FOOTER: u8 = 5;

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// COW log header (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CowLogHeader {
    /// Magic bytes: "DCOW"
    pub magic: [u8; 4],
    /// Format version for forward compatibility
    pub format_version: u32,
    /// Block size of every Replace payload in this log
    pub block_size: u32,
    /// Reserved flag bits (zero)
    pub flags: u32,
    /// Creation time (microseconds since epoch)
    pub created_at: u64,
}

impl CowLogHeader {
    /// Create a header for a new log.
    pub fn new(block_size: u32, created_at: u64) -> Self {
        CowLogHeader {
            magic: COW_MAGIC,
            format_version: COW_LOG_FORMAT_VERSION,
            block_size,
            flags: 0,
            created_at,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; COW_HEADER_SIZE] {
        let mut bytes = [0u8; COW_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.flags.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.created_at.to_le_bytes());
        // 24..32 reserved
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; COW_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        CowLogHeader {
            magic,
            format_version: le_u32(&bytes[4..8]),
            block_size: le_u32(&bytes[8..12]),
            flags: le_u32(&bytes[12..16]),
            created_at: le_u64(&bytes[16..24]),
        }
    }

    /// Validate magic and version.
    pub fn is_valid(&self) -> bool {
        self.magic == COW_MAGIC && self.format_version == COW_LOG_FORMAT_VERSION
    }
}

/// A record in the COW log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CowRecord {
    /// Block entry for the merge step
    Entry(CowEntry),
    /// All operations before `next_op_index` are fully recorded
    Label(u64),
    /// The writer finished cleanly after `entries` block entries
    Footer {
        /// Number of block entries in the log
        entries: u64,
    },
}

impl CowRecord {
    /// Serialize record to bytes (for appending to the log).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            CowRecord::Entry(entry) => Self::encode_entry(entry),
            CowRecord::Label(label) => {
                let mut payload = Self::payload_with_capacity(KIND_LABEL, 8);
                payload.extend_from_slice(&label.to_le_bytes());
                Self::frame(payload)
            }
            CowRecord::Footer { entries } => {
                let mut payload = Self::payload_with_capacity(KIND_FOOTER, 8);
                payload.extend_from_slice(&entries.to_le_bytes());
                Self::frame(payload)
            }
        }
    }

    /// Serialize a block entry without wrapping it in a `CowRecord`.
    pub fn encode_entry(entry: &CowEntry) -> Vec<u8> {
        match entry {
            CowEntry::Copy {
                source_block,
                dest_block,
            } => {
                let mut payload = Self::payload_with_capacity(KIND_COPY, 16);
                payload.extend_from_slice(&source_block.to_le_bytes());
                payload.extend_from_slice(&dest_block.to_le_bytes());
                Self::frame(payload)
            }
            CowEntry::Replace { dest_block, data } => Self::encode_replace(*dest_block, data),
            CowEntry::Zero { dest_block } => {
                let mut payload = Self::payload_with_capacity(KIND_ZERO, 8);
                payload.extend_from_slice(&dest_block.to_le_bytes());
                Self::frame(payload)
            }
        }
    }

    /// Serialize a Replace entry straight from a borrowed block.
    pub fn encode_replace(dest_block: u64, data: &[u8]) -> Vec<u8> {
        let mut payload = Self::payload_with_capacity(KIND_REPLACE, 8 + data.len());
        payload.extend_from_slice(&dest_block.to_le_bytes());
        payload.extend_from_slice(data);
        Self::frame(payload)
    }

    fn payload_with_capacity(kind: u8, body_len: usize) -> Vec<u8> {
        // length placeholder + version + kind + body + CRC appended by frame()
        let mut payload = Vec::with_capacity(4 + 2 + body_len + 4);
        payload.extend_from_slice(&[0u8; 4]);
        payload.push(COW_RECORD_FORMAT_VERSION);
        payload.push(kind);
        payload
    }

    /// Fill in the length prefix and append the CRC.
    fn frame(mut record: Vec<u8>) -> Vec<u8> {
        let crc = Self::compute_crc(&record[4..]);
        record.extend_from_slice(&crc.to_le_bytes());
        let length = (record.len() - 4) as u32;
        record[0..4].copy_from_slice(&length.to_le_bytes());
        record
    }

    /// Deserialize a record from bytes.
    ///
    /// Returns (record, bytes_consumed) on success.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), CowRecordError> {
        if bytes.len() < 4 {
            return Err(CowRecordError::InsufficientData);
        }

        let length = le_u32(&bytes[0..4]) as usize;

        // Minimum: version (1) + kind (1) + CRC (4)
        if length < 6 || length > MAX_RECORD_LEN {
            return Err(CowRecordError::InvalidLength(length));
        }

        if bytes.len() < 4 + length {
            return Err(CowRecordError::InsufficientData);
        }

        let payload = &bytes[4..4 + length - 4];
        let stored_crc = le_u32(&bytes[4 + length - 4..4 + length]);
        let computed_crc = Self::compute_crc(payload);
        if computed_crc != stored_crc {
            return Err(CowRecordError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let version = payload[0];
        if version != COW_RECORD_FORMAT_VERSION {
            return Err(CowRecordError::UnsupportedVersion(version));
        }

        let kind = payload[1];
        let body = &payload[2..];
        let fixed = |n: usize| -> Result<(), CowRecordError> {
            if body.len() == n {
                Ok(())
            } else {
                Err(CowRecordError::InvalidFormat)
            }
        };

        let record = match kind {
            KIND_COPY => {
                fixed(16)?;
                CowRecord::Entry(CowEntry::Copy {
                    source_block: le_u64(&body[0..8]),
                    dest_block: le_u64(&body[8..16]),
                })
            }
            KIND_REPLACE => {
                if body.len() <= 8 {
                    return Err(CowRecordError::InvalidFormat);
                }
                CowRecord::Entry(CowEntry::Replace {
                    dest_block: le_u64(&body[0..8]),
                    data: body[8..].to_vec(),
                })
            }
            KIND_ZERO => {
                fixed(8)?;
                CowRecord::Entry(CowEntry::Zero {
                    dest_block: le_u64(body),
                })
            }
            KIND_LABEL => {
                fixed(8)?;
                CowRecord::Label(le_u64(body))
            }
            KIND_FOOTER => {
                fixed(8)?;
                CowRecord::Footer {
                    entries: le_u64(body),
                }
            }
            other => return Err(CowRecordError::UnknownKind(other)),
        };

        Ok((record, 4 + length))
    }

    /// Compute CRC32 checksum of data.
    fn compute_crc(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}

/// COW record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CowRecordError {
    /// Not enough data to parse record
    #[error("Insufficient data to parse record")]
    InsufficientData,

    /// Length prefix outside the valid range
    #[error("Invalid record length: {0}")]
    InvalidLength(usize),

    /// Body does not match the record kind
    #[error("Invalid record format")]
    InvalidFormat,

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from record
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown record kind
    #[error("Unknown record kind: {0}")]
    UnknownKind(u8),
}
