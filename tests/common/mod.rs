//! Shared test utilities for the root integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's
//! main.rs.

#![allow(dead_code)]

pub use deltacow::{
    CowEntry, CowLogConfig, CowLogDir, CowLogReader, DeltaOperation, DurabilityMode, Error,
    Extent, FileCheckpointStore, MemoryCheckpointStore, MemorySinkProvider, MemorySource,
    PartitionContext, PartitionPlan, PartitionWriter, ReplayImage, WriterConfig,
};
use deltacow_engine::testing::make_bsdiff_patch;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Once;

pub const BS: u32 = 512;

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Scenario - source image, plan, blobs and expected target
// ============================================================================

/// One partition update with its expected outcome.
pub struct Scenario {
    pub source: Vec<u8>,
    pub plan: PartitionPlan,
    pub blobs: Vec<Vec<u8>>,
    pub target: Vec<u8>,
}

impl Scenario {
    pub fn num_ops(&self) -> usize {
        self.plan.operations.len()
    }

    /// Write the source image to `dir` and return its path.
    pub fn write_source(&self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("{}.img", self.plan.partition_name));
        std::fs::write(&path, &self.source).unwrap();
        path
    }
}

/// Coalesce a block list into extents, keeping its order.
pub fn extents_from_blocks(blocks: &[u64]) -> Vec<Extent> {
    let mut extents: Vec<Extent> = Vec::new();
    for &block in blocks {
        match extents.last_mut() {
            Some(last) if last.start_block + last.num_blocks == block => last.num_blocks += 1,
            _ => extents.push(Extent::new(block, 1)),
        }
    }
    extents
}

fn block_range(block: u64) -> std::ops::Range<usize> {
    let start = block as usize * BS as usize;
    start..start + BS as usize
}

/// Random plan over a random image.
///
/// Operations only read blocks that no earlier operation wrote, the way an
/// update generator orders a payload; a single source copy may still overlap
/// its own destination.
pub fn random_scenario(seed: u64, name: &str, num_blocks: u64, num_ops: usize) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut source = vec![0u8; num_blocks as usize * BS as usize];
    rng.fill(source.as_mut_slice());

    let mut target = source.clone();
    let mut written: HashSet<u64> = HashSet::new();
    let mut plan = PartitionPlan::new(name, source.len() as u64);
    let mut blobs = Vec::new();

    for _ in 0..num_ops {
        let readable: Vec<u64> = (0..num_blocks).filter(|b| !written.contains(b)).collect();
        let count = rng.gen_range(1..=4usize);
        let mut dst: Vec<u64> = (0..num_blocks).collect::<Vec<_>>();
        dst.shuffle(&mut rng);
        dst.truncate(count);

        let kind = if readable.len() < count {
            rng.gen_range(0..2)
        } else {
            rng.gen_range(0..5)
        };
        let (op, blob) = match kind {
            0 => {
                for &d in &dst {
                    target[block_range(d)].fill(0);
                }
                let extents = extents_from_blocks(&dst);
                if rng.gen_bool(0.5) {
                    (DeltaOperation::zero(extents), Vec::new())
                } else {
                    (DeltaOperation::discard(extents), Vec::new())
                }
            }
            1 => {
                let mut data = vec![0u8; count * BS as usize];
                rng.fill(data.as_mut_slice());
                for (i, &d) in dst.iter().enumerate() {
                    target[block_range(d)].copy_from_slice(&data[block_range(i as u64)]);
                }
                (
                    DeltaOperation::replace(extents_from_blocks(&dst), data.len() as u64),
                    data,
                )
            }
            2 | 3 => {
                // Scattered blocks or a run shifted up by one
                let src: Vec<u64> = if kind == 2 {
                    let mut src = readable.clone();
                    src.shuffle(&mut rng);
                    src.truncate(count);
                    src
                } else {
                    let start = readable[rng.gen_range(0..readable.len())];
                    let run: Vec<u64> = (start..start + count as u64)
                        .take_while(|b| readable.contains(b))
                        .collect();
                    dst = run.iter().map(|b| (b + 1) % num_blocks).collect();
                    run
                };
                dst.truncate(src.len());
                let dst_unique: HashSet<u64> = dst.iter().copied().collect();
                if dst_unique.len() != dst.len() {
                    continue;
                }
                for (&s, &d) in src.iter().zip(&dst) {
                    let bytes = source[block_range(s)].to_vec();
                    target[block_range(d)].copy_from_slice(&bytes);
                }
                let mut op =
                    DeltaOperation::source_copy(extents_from_blocks(&src), extents_from_blocks(&dst));
                if rng.gen_bool(0.5) {
                    op = op.with_src_sha256(digest_of(&source, &src));
                }
                (op, Vec::new())
            }
            _ => {
                let mut src = readable.clone();
                src.shuffle(&mut rng);
                src.truncate(rng.gen_range(1..=count));
                let old: Vec<u8> = src
                    .iter()
                    .flat_map(|&s| source[block_range(s)].to_vec())
                    .collect();
                let new: Vec<u8> = old
                    .iter()
                    .cycle()
                    .take(dst.len() * BS as usize)
                    .enumerate()
                    .map(|(i, b)| if i % 97 == 0 { b.wrapping_add(1) } else { *b })
                    .collect();
                for (i, &d) in dst.iter().enumerate() {
                    target[block_range(d)].copy_from_slice(&new[block_range(i as u64)]);
                }
                let patch = make_bsdiff_patch(&old, &new).unwrap();
                let op = DeltaOperation::source_bsdiff(
                    extents_from_blocks(&src),
                    extents_from_blocks(&dst),
                    patch.len() as u64,
                )
                .with_src_sha256(digest_of(&source, &src));
                (op, patch)
            }
        };
        written.extend(op.dst_extents.iter().flat_map(|e| e.start_block..e.start_block + e.num_blocks));
        plan.operations.push(op);
        blobs.push(blob);
    }

    Scenario {
        source,
        plan,
        blobs,
        target,
    }
}

fn digest_of(image: &[u8], blocks: &[u64]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for &b in blocks {
        hasher.update(&image[block_range(b)]);
    }
    hasher.finalize().into()
}

// ============================================================================
// Running and checking
// ============================================================================

/// File-backed writer with its log under `cow_dir` and checkpoint under
/// `state_dir`.
pub fn file_writer(
    ctx: PartitionContext,
    cow_dir: &Path,
    state_dir: &Path,
    durability: DurabilityMode,
) -> PartitionWriter {
    let sinks = CowLogDir::new(cow_dir)
        .with_durability(durability)
        .with_config(CowLogConfig::for_testing());
    let checkpoints = FileCheckpointStore::new(state_dir).unwrap();
    PartitionWriter::new(ctx, Box::new(sinks), Box::new(checkpoints))
}

/// Apply operations `from..to`, checkpointing after each.
pub fn run_ops(writer: &mut PartitionWriter, scenario: &Scenario, from: usize, to: usize) {
    for i in from..to {
        writer
            .apply(&scenario.plan.operations[i], &scenario.blobs[i])
            .unwrap();
        writer.checkpoint(i + 1).unwrap();
    }
}

/// Merge the finalized log at `log_path` over the scenario's source.
pub fn merged_image(log_path: &Path, scenario: &Scenario) -> Vec<u8> {
    let contents = CowLogReader::read_all(log_path).unwrap();
    assert!(contents.is_finalized(), "log {} not finalized", log_path.display());
    let mut image = ReplayImage::new(scenario.source.clone(), BS).unwrap();
    image.replay(contents.entries()).unwrap();
    image.into_bytes()
}
