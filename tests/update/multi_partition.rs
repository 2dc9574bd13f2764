//! Independent partitions
//!
//! One writer per partition, each on its own thread, sharing a COW log
//! directory. Each partition keeps its own checkpoint.

use crate::common::*;
use std::thread;
use tempfile::TempDir;

#[test]
fn partitions_update_in_parallel() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let cow_dir = dir.path().join("cow");
    let names = ["system", "vendor", "product", "odm"];

    let scenarios: Vec<Scenario> = names
        .iter()
        .enumerate()
        .map(|(i, name)| random_scenario(100 + i as u64, name, 24, 10))
        .collect();

    let handles: Vec<_> = scenarios
        .iter()
        .map(|scenario| {
            let state_dir = dir.path().join("state").join(&scenario.plan.partition_name);
            std::fs::create_dir_all(&state_dir).unwrap();
            let source = scenario.write_source(dir.path());
            let mut writer = file_writer(
                PartitionContext::new(BS).with_source(source),
                &cow_dir,
                &state_dir,
                DurabilityMode::Always,
            );
            let plan = scenario.plan.clone();
            let blobs = scenario.blobs.clone();
            thread::spawn(move || {
                writer.init(&plan, true, 0).unwrap();
                for (i, op) in plan.operations.iter().enumerate() {
                    writer.apply(op, &blobs[i]).unwrap();
                    writer.checkpoint(i + 1).unwrap();
                }
                writer.finished_install_ops().unwrap();
                writer.close().unwrap();
                writer.counters()
            })
        })
        .collect();

    for (handle, scenario) in handles.into_iter().zip(&scenarios) {
        let counters = handle.join().unwrap();
        assert_eq!(counters.ops_applied, scenario.num_ops() as u64);

        let log = cow_dir.join(format!("{}.cow", scenario.plan.partition_name));
        assert_eq!(merged_image(&log, scenario), scenario.target);

        let state_dir = dir.path().join("state").join(&scenario.plan.partition_name);
        let store = FileCheckpointStore::new(&state_dir).unwrap();
        assert_eq!(
            deltacow::CheckpointStore::load(&store).unwrap(),
            Some(scenario.num_ops())
        );
    }
}

#[test]
fn one_failing_partition_leaves_others_intact() {
    let dir = TempDir::new().unwrap();
    let good = random_scenario(1, "system", 16, 6);
    let mut bad = random_scenario(2, "vendor", 16, 6);
    // Replace blob one byte short
    let idx = bad
        .plan
        .operations
        .iter()
        .position(|op| op.op_type == deltacow::OperationType::Replace);

    let sinks = MemorySinkProvider::new();
    let run = |scenario: &Scenario| -> deltacow::Result<()> {
        let mut writer = PartitionWriter::new(
            PartitionContext::new(BS).with_source(Box::new(MemorySource::new(scenario.source.clone()))),
            Box::new(sinks.clone()),
            Box::new(MemoryCheckpointStore::new()),
        );
        writer.init(&scenario.plan, true, 0)?;
        for (i, op) in scenario.plan.operations.iter().enumerate() {
            writer.apply(op, &scenario.blobs[i])?;
            writer.checkpoint(i + 1)?;
        }
        writer.finished_install_ops()
    };

    run(&good).unwrap();
    if let Some(idx) = idx {
        bad.blobs[idx].pop();
        bad.plan.operations[idx].data_length = 0;
        assert!(matches!(run(&bad), Err(Error::LengthMismatch { .. })));
        assert_eq!(sinks.handle("vendor").unwrap().labels().len(), idx);
    }

    let handle = sinks.handle("system").unwrap();
    assert!(handle.is_finalized());
    let mut image = ReplayImage::new(good.source.clone(), BS).unwrap();
    image.replay(handle.entries().iter()).unwrap();
    assert_eq!(image.as_bytes(), good.target.as_slice());
}
