//! COW log entries
//!
//! A [`CowEntry`] is the unit handed to the snapshot sink. Entries are
//! transient: produced while one delta operation is processed and dropped once
//! the sink has accepted them.

use std::fmt;

/// One block-granular COW log entry.
#[derive(Clone, PartialEq, Eq)]
pub enum CowEntry {
    /// Destination block takes the current content of a source block
    Copy {
        /// Block read at merge time
        source_block: u64,
        /// Block written at merge time
        dest_block: u64,
    },
    /// Destination block takes literal bytes (exactly one block)
    Replace {
        /// Block written at merge time
        dest_block: u64,
        /// Block content
        data: Vec<u8>,
    },
    /// Destination block becomes zero
    Zero {
        /// Block written at merge time
        dest_block: u64,
    },
}

impl CowEntry {
    /// Block written by this entry.
    pub fn dest_block(&self) -> u64 {
        match self {
            CowEntry::Copy { dest_block, .. }
            | CowEntry::Replace { dest_block, .. }
            | CowEntry::Zero { dest_block } => *dest_block,
        }
    }

    /// Block read by this entry at merge time, if any.
    pub fn source_block(&self) -> Option<u64> {
        match self {
            CowEntry::Copy { source_block, .. } => Some(*source_block),
            _ => None,
        }
    }

    /// Short kind name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CowEntry::Copy { .. } => "copy",
            CowEntry::Replace { .. } => "replace",
            CowEntry::Zero { .. } => "zero",
        }
    }
}

// Replace payloads are whole blocks; print their length instead of the bytes.
impl fmt::Debug for CowEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CowEntry::Copy {
                source_block,
                dest_block,
            } => write!(f, "Copy({} -> {})", source_block, dest_block),
            CowEntry::Replace { dest_block, data } => {
                write!(f, "Replace({}, {} bytes)", dest_block, data.len())
            }
            CowEntry::Zero { dest_block } => write!(f, "Zero({})", dest_block),
        }
    }
}
