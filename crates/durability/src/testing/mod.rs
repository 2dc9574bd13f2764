//! Testing utilities for COW logs
//!
//! [`ReplayImage`] replays entries in place onto a partition image, one at a
//! time and in log order, the way a snapshot merge does. A `Copy` reads the
//! image as it is at that point, so a log that reads a block after an earlier
//! entry overwrote it produces the wrong image.
//!
//! # Example
//!
//! ```ignore
//! use deltacow_durability::testing::ReplayImage;
//!
//! let mut image = ReplayImage::new(source_bytes, 4096)?;
//! image.replay(handle.entries().iter())?;
//! assert_eq!(image.as_bytes(), expected_target);
//! ```

use deltacow_core::CowEntry;

/// Replay failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// Image length is not a whole number of blocks
    #[error("image of {len} bytes is not a multiple of block size {block_size}")]
    UnalignedImage {
        /// Image length
        len: usize,
        /// Block size
        block_size: u32,
    },

    /// Entry touches a block past the end of the image
    #[error("block {0} is outside the image")]
    OutOfRange(u64),

    /// Replace payload is not exactly one block
    #[error("replace payload for block {dest_block} is {len} bytes")]
    BadPayload {
        /// Destination block
        dest_block: u64,
        /// Payload length
        len: usize,
    },
}

/// Partition image that COW entries are merged into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayImage {
    block_size: u32,
    bytes: Vec<u8>,
}

impl ReplayImage {
    /// Start from `base` (the source partition contents).
    pub fn new(base: Vec<u8>, block_size: u32) -> Result<Self, ReplayError> {
        if block_size == 0 || base.len() % block_size as usize != 0 {
            return Err(ReplayError::UnalignedImage {
                len: base.len(),
                block_size,
            });
        }
        Ok(ReplayImage {
            block_size,
            bytes: base,
        })
    }

    /// Number of blocks in the image.
    pub fn num_blocks(&self) -> u64 {
        (self.bytes.len() / self.block_size as usize) as u64
    }

    /// Contents of one block.
    pub fn block(&self, block: u64) -> Option<&[u8]> {
        let range = self.range(block).ok()?;
        Some(&self.bytes[range])
    }

    /// Apply one entry in place.
    pub fn apply(&mut self, entry: &CowEntry) -> Result<(), ReplayError> {
        match entry {
            CowEntry::Copy {
                source_block,
                dest_block,
            } => {
                let src = self.range(*source_block)?;
                let dst = self.range(*dest_block)?;
                self.bytes.copy_within(src, dst.start);
            }
            CowEntry::Replace { dest_block, data } => {
                if data.len() != self.block_size as usize {
                    return Err(ReplayError::BadPayload {
                        dest_block: *dest_block,
                        len: data.len(),
                    });
                }
                let dst = self.range(*dest_block)?;
                self.bytes[dst].copy_from_slice(data);
            }
            CowEntry::Zero { dest_block } => {
                let dst = self.range(*dest_block)?;
                self.bytes[dst].fill(0);
            }
        }
        Ok(())
    }

    /// Apply entries in order.
    pub fn replay<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a CowEntry>,
    ) -> Result<(), ReplayError> {
        for entry in entries {
            self.apply(entry)?;
        }
        Ok(())
    }

    /// Current image contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the image.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn range(&self, block: u64) -> Result<std::ops::Range<usize>, ReplayError> {
        if block >= self.num_blocks() {
            return Err(ReplayError::OutOfRange(block));
        }
        let start = block as usize * self.block_size as usize;
        Ok(start..start + self.block_size as usize)
    }
}
