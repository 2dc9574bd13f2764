//! Core types for deltacow
//!
//! This crate defines the foundational types shared by the durability and
//! engine crates:
//! - Extent: contiguous run of fixed-size blocks
//! - DeltaOperation / OperationType: one typed delta operation from the payload plan
//! - CowEntry: the unit persisted to the snapshot (COW) log
//! - Error / ErrorCode: error hierarchy of the partition write pipeline
//! - Limits: block size bounds and geometry validation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cow;
pub mod error;
pub mod limits;
pub mod operation;
pub mod types;

pub use cow::CowEntry;
pub use error::{Error, ErrorCode, Result};
pub use limits::{validate_block_size, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use operation::{DeltaOperation, OperationType, Sha256Digest};
pub use types::{block_iter, find_overlap, total_blocks, Extent};
