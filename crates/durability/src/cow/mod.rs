//! COW log module
//!
//! - `mode`: durability modes (Cache / Always / Standard)
//! - `config`: log configuration (CowLogConfig, CowLogConfigError)
//! - `writer`: append-side log handle (CowLogWriter)
//! - `reader`: sequential log reader (CowLogReader)

pub mod config;
pub mod mode;
pub mod reader;
pub mod writer;

pub use config::{CowLogConfig, CowLogConfigError};
pub use mode::DurabilityMode;
pub use reader::{CowLogContents, CowLogReader, ReadStopReason};
pub use writer::{CowLogCounters, CowLogWriter};

use std::io;

/// Errors raised by the COW log and the snapshot sinks built on it.
#[derive(Debug, thiserror::Error)]
pub enum CowLogError {
    /// Underlying file operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Log configuration rejected
    #[error("Invalid COW log configuration: {0}")]
    Config(#[from] CowLogConfigError),

    /// Header is missing, has bad magic, or an unsupported version
    #[error("Invalid COW log header: {0}")]
    InvalidHeader(String),

    /// Existing log was written with a different block size
    #[error("Block size mismatch: log has {log}, writer expects {expected}")]
    BlockSizeMismatch {
        /// Block size recorded in the log header
        log: u32,
        /// Block size requested by the caller
        expected: u32,
    },

    /// Resume label is not present in the log
    #[error("Label {0} not found in COW log")]
    LabelNotFound(u64),

    /// Replace payload is not a whole number of blocks
    #[error("Replace payload of {len} bytes is not a multiple of block size {block_size}")]
    UnalignedPayload {
        /// Payload length
        len: usize,
        /// Log block size
        block_size: u32,
    },

    /// Append after finalize
    #[error("COW log already finalized")]
    Finalized,

    /// Use after close
    #[error("COW log closed")]
    Closed,
}
