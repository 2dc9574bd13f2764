//! Block extent types
//!
//! An [`Extent`] is a contiguous run of blocks. Extent lists are ordered: the
//! order defines how a linear byte buffer maps onto blocks, so two lists with
//! the same extents in a different order describe different mappings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Contiguous run of fixed-size blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// First block of the run
    pub start_block: u64,
    /// Number of blocks in the run
    pub num_blocks: u64,
}

impl Extent {
    /// Create a new extent.
    pub const fn new(start_block: u64, num_blocks: u64) -> Self {
        Extent {
            start_block,
            num_blocks,
        }
    }

    /// One past the last block of the extent.
    ///
    /// Returns `None` if the end overflows `u64`.
    pub fn end_block(&self) -> Option<u64> {
        self.start_block.checked_add(self.num_blocks)
    }

    /// Whether `block` falls inside this extent.
    pub fn contains(&self, block: u64) -> bool {
        block >= self.start_block && block - self.start_block < self.num_blocks
    }

    /// Whether two extents share at least one block.
    pub fn overlaps(&self, other: &Extent) -> bool {
        if self.num_blocks == 0 || other.num_blocks == 0 {
            return false;
        }
        let self_end = self.start_block.saturating_add(self.num_blocks);
        let other_end = other.start_block.saturating_add(other.num_blocks);
        self.start_block < other_end && other.start_block < self_end
    }

    /// Length of the extent in bytes for the given block size.
    ///
    /// Returns `None` on overflow.
    pub fn byte_len(&self, block_size: u32) -> Option<u64> {
        self.num_blocks.checked_mul(block_size as u64)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.start_block, self.num_blocks)
    }
}

/// Sum of `num_blocks` across an extent list (saturating).
pub fn total_blocks(extents: &[Extent]) -> u64 {
    extents
        .iter()
        .fold(0u64, |acc, e| acc.saturating_add(e.num_blocks))
}

/// Iterate every block of an extent list in mapping order.
pub fn block_iter(extents: &[Extent]) -> impl Iterator<Item = u64> + '_ {
    extents
        .iter()
        .flat_map(|e| (0..e.num_blocks).map(move |i| e.start_block + i))
}

/// Find the first pair of overlapping extents within one list.
///
/// Returns the indices of the two extents, or `None` if the list is disjoint.
pub fn find_overlap(extents: &[Extent]) -> Option<(usize, usize)> {
    let mut order: Vec<usize> = (0..extents.len())
        .filter(|&i| extents[i].num_blocks > 0)
        .collect();
    order.sort_by_key(|&i| extents[i].start_block);
    order
        .windows(2)
        .find(|w| extents[w[0]].overlaps(&extents[w[1]]))
        .map(|w| (w[0].min(w[1]), w[0].max(w[1])))
}
