//! Integration tests for whole partition updates.
//!
//! These tests drive `PartitionWriter` through complete plans against
//! file-backed COW logs and checkpoint stores, then merge each log over its
//! source image and compare with the expected target. Unit tests in the
//! crates cover the individual components.

#[path = "../common/mod.rs"]
mod common;

mod crash_resume;
mod mode_equivalence;
mod multi_partition;
mod plan_file;
