//! COW Operation Converter
//!
//! Turns a source copy (i-th source block to i-th destination block, in
//! linear extent order) into CowEntries that are safe to replay in place.
//!
//! Entries keep the original order. Walking that order, an entry whose source
//! block was already written by an earlier entry can no longer be copied at
//! merge time, so its original bytes are captured now as a `Replace`. Every
//! other entry stays a `Copy`. Identity moves (`source == dest`) change
//! nothing and produce no entry.
//!
//! Planning ([`CowPlan::build`]) is pure; materialization
//! ([`write_all_cow_ops`]) needs the source bytes only if the plan holds a
//! `Replace`.

use deltacow_core::{block_iter, total_blocks, CowEntry, Error, Extent, Result};
use deltacow_durability::SnapshotSink;
use std::collections::BTreeMap;

use crate::extent_writer::sink_error;

/// How a mapped block is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedKind {
    /// Copied by the merge from the untouched source block
    Copy,
    /// Source block is overwritten earlier; bytes are captured now
    Replace,
    /// Source and destination are the same block
    Identity,
}

/// One mapped block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedEntry {
    /// Position in the linear block mapping
    pub index: usize,
    /// Source block
    pub source_block: u64,
    /// Destination block
    pub dest_block: u64,
    /// Emission kind
    pub kind: PlannedKind,
}

/// Entry counts of a materialized plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    /// Copy entries written
    pub copies: u64,
    /// Replace entries written
    pub replaces: u64,
    /// Identity moves dropped
    pub skipped: u64,
}

/// Ordered plan for one source copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CowPlan {
    entries: Vec<PlannedEntry>,
}

impl CowPlan {
    /// Plan the block mapping from `src` to `dst`.
    pub fn build(src: &[Extent], dst: &[Extent]) -> Result<Self> {
        let src_blocks = total_blocks(src);
        let dst_blocks = total_blocks(dst);
        if src_blocks != dst_blocks {
            return Err(Error::length_mismatch(
                "source copy block count",
                dst_blocks,
                src_blocks,
            ));
        }

        let mut written = BlockSet::default();
        let mut entries = Vec::with_capacity(dst_blocks as usize);
        for (index, (source_block, dest_block)) in block_iter(src).zip(block_iter(dst)).enumerate()
        {
            let kind = if source_block == dest_block {
                PlannedKind::Identity
            } else if written.contains(source_block) {
                PlannedKind::Replace
            } else {
                PlannedKind::Copy
            };
            if kind != PlannedKind::Identity {
                written.insert(dest_block);
            }
            entries.push(PlannedEntry {
                index,
                source_block,
                dest_block,
                kind,
            });
        }
        Ok(CowPlan { entries })
    }

    /// Planned entries in emission order.
    pub fn entries(&self) -> &[PlannedEntry] {
        &self.entries
    }

    /// Number of entries that must be materialized from source bytes.
    pub fn replace_count(&self) -> usize {
        self.count(PlannedKind::Replace)
    }

    /// Number of Copy entries.
    pub fn copy_count(&self) -> usize {
        self.count(PlannedKind::Copy)
    }

    /// Whether materialization needs the source bytes.
    pub fn needs_source_bytes(&self) -> bool {
        self.replace_count() > 0
    }

    fn count(&self, kind: PlannedKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

/// Hand a plan to the sink.
///
/// `source` is the concatenation of the source extents, in list order. With
/// `force_replace`, every mapped block (identity moves included) is written as
/// a `Replace` from `source`; this is used when the source partition itself
/// cannot be trusted for a later merge.
pub fn write_all_cow_ops(
    plan: &CowPlan,
    sink: &mut dyn SnapshotSink,
    source: Option<&[u8]>,
    force_replace: bool,
) -> Result<ConvertStats> {
    let block_size = sink.block_size() as usize;
    let needs_bytes = force_replace || plan.needs_source_bytes();
    let source = match source {
        Some(bytes) if needs_bytes => {
            let expected = (plan.entries.len() * block_size) as u64;
            if bytes.len() as u64 != expected {
                return Err(Error::length_mismatch(
                    "source copy bytes",
                    expected,
                    bytes.len() as u64,
                ));
            }
            Some(bytes)
        }
        None if needs_bytes => {
            return Err(Error::InvalidOperation(
                "source copy needs source bytes to materialize Replace entries".to_string(),
            ))
        }
        _ => None,
    };

    let mut stats = ConvertStats::default();
    for entry in &plan.entries {
        let kind = match (entry.kind, force_replace) {
            (_, true) => PlannedKind::Replace,
            (kind, false) => kind,
        };
        let cow = match (kind, source) {
            (PlannedKind::Identity, _) => {
                stats.skipped += 1;
                continue;
            }
            (PlannedKind::Copy, _) => {
                stats.copies += 1;
                CowEntry::Copy {
                    source_block: entry.source_block,
                    dest_block: entry.dest_block,
                }
            }
            (PlannedKind::Replace, Some(bytes)) => {
                stats.replaces += 1;
                let start = entry.index * block_size;
                CowEntry::Replace {
                    dest_block: entry.dest_block,
                    data: bytes[start..start + block_size].to_vec(),
                }
            }
            (PlannedKind::Replace, None) => {
                return Err(Error::InvalidOperation(
                    "Replace entry planned without source bytes".to_string(),
                ))
            }
        };
        sink.append(&cow).map_err(sink_error)?;
    }
    Ok(stats)
}

/// Set of blocks kept as disjoint, non-adjacent half-open runs keyed by start.
#[derive(Debug, Default)]
struct BlockSet {
    runs: BTreeMap<u64, u64>,
}

impl BlockSet {
    fn contains(&self, block: u64) -> bool {
        self.runs
            .range(..=block)
            .next_back()
            .map_or(false, |(_, end)| block < *end)
    }

    fn insert(&mut self, block: u64) {
        if self.contains(block) {
            return;
        }
        let end = block.saturating_add(1);
        let mut start = block;
        let mut new_end = end;

        if let Some((&prev_start, &prev_end)) = self.runs.range(..block).next_back() {
            if prev_end == block {
                start = prev_start;
                self.runs.remove(&prev_start);
            }
        }
        if let Some(&next_end) = self.runs.get(&end) {
            new_end = next_end;
            self.runs.remove(&end);
        }
        self.runs.insert(start, new_end);
    }
}
