//! Block size limits
//!
//! All extents of one partition share a single power-of-two block size.

use crate::error::{Error, Result};

/// Smallest supported block size in bytes.
pub const MIN_BLOCK_SIZE: u32 = 512;

/// Largest supported block size in bytes.
pub const MAX_BLOCK_SIZE: u32 = 1024 * 1024;

/// Block size used by Android-style payloads.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Validate a partition block size.
///
/// The block size must be a power of two within
/// [`MIN_BLOCK_SIZE`, `MAX_BLOCK_SIZE`].
pub fn validate_block_size(block_size: u32) -> Result<()> {
    if !block_size.is_power_of_two() {
        return Err(Error::Init(format!(
            "block size {} is not a power of two",
            block_size
        )));
    }
    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
        return Err(Error::Init(format!(
            "block size {} outside supported range {}..={}",
            block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
        )));
    }
    Ok(())
}
