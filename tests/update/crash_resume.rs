//! Crash and resume
//!
//! A writer is abandoned at a random point, sometimes with a torn record at
//! the end of its log. Resuming from the persisted checkpoint must give the
//! same merged image as an uninterrupted run.

use crate::common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;

fn run_to_completion(scenario: &Scenario, dir: &TempDir) -> Vec<u8> {
    let source = scenario.write_source(dir.path());
    let mut writer = file_writer(
        PartitionContext::new(BS).with_source(source),
        dir.path(),
        dir.path(),
        DurabilityMode::Always,
    );
    writer.init(&scenario.plan, true, 0).unwrap();
    run_ops(&mut writer, scenario, 0, scenario.num_ops());
    writer.finished_install_ops().unwrap();
    writer.close().unwrap();
    merged_image(&dir.path().join("system.cow"), scenario)
}

#[test]
fn uninterrupted_run_reaches_target() {
    init_tracing();
    for seed in 0..8 {
        let scenario = random_scenario(seed, "system", 32, 12);
        let dir = TempDir::new().unwrap();
        assert_eq!(run_to_completion(&scenario, &dir), scenario.target, "seed {}", seed);
    }
}

#[test]
fn resume_after_random_crash_matches_uninterrupted() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);

    for seed in 0..16 {
        let scenario = random_scenario(seed, "system", 32, 12);
        let total = scenario.num_ops();
        let crash_at = rng.gen_range(0..total);
        let torn = rng.gen_bool(0.5);

        let dir = TempDir::new().unwrap();
        let source = scenario.write_source(dir.path());
        let durability = DurabilityMode::Standard {
            interval_ms: 60_000,
            batch_size: 1_000,
        };

        {
            let mut writer = file_writer(
                PartitionContext::new(BS).with_source(source.clone()),
                dir.path(),
                dir.path(),
                durability,
            );
            writer.init(&scenario.plan, true, 0).unwrap();
            run_ops(&mut writer, &scenario, 0, crash_at);
            writer
                .apply(&scenario.plan.operations[crash_at], &scenario.blobs[crash_at])
                .unwrap();
        }
        if torn {
            let mut log = OpenOptions::new()
                .append(true)
                .open(dir.path().join("system.cow"))
                .unwrap();
            log.write_all(&[0x20, 0x02, 0, 0, 1, 2, 0xAA]).unwrap();
        }

        let mut writer = file_writer(
            PartitionContext::new(BS).with_source(source),
            dir.path(),
            dir.path(),
            durability,
        );
        let next = writer.load_checkpoint().unwrap();
        assert_eq!(next, crash_at);
        writer.init(&scenario.plan, true, next).unwrap();
        run_ops(&mut writer, &scenario, next, total);
        writer.finished_install_ops().unwrap();
        writer.close().unwrap();

        assert_eq!(
            merged_image(&dir.path().join("system.cow"), &scenario),
            scenario.target,
            "seed {} crash_at {} torn {}",
            seed,
            crash_at,
            torn
        );
    }
}

#[test]
fn resuming_twice_from_same_checkpoint() {
    init_tracing();
    let scenario = random_scenario(42, "system", 32, 10);
    let total = scenario.num_ops();
    let dir = TempDir::new().unwrap();
    let source = scenario.write_source(dir.path());
    let open = || {
        file_writer(
            PartitionContext::new(BS).with_source(source.clone()),
            dir.path(),
            dir.path(),
            DurabilityMode::Always,
        )
    };

    {
        let mut writer = open();
        writer.init(&scenario.plan, true, 0).unwrap();
        run_ops(&mut writer, &scenario, 0, total / 2);
    }
    for _ in 0..2 {
        let mut writer = open();
        let next = writer.load_checkpoint().unwrap();
        assert_eq!(next, total / 2);
        writer.init(&scenario.plan, true, next).unwrap();
        writer
            .apply(&scenario.plan.operations[next], &scenario.blobs[next])
            .unwrap();
    }

    let mut writer = open();
    let next = writer.load_checkpoint().unwrap();
    writer.init(&scenario.plan, true, next).unwrap();
    run_ops(&mut writer, &scenario, next, total);
    writer.finished_install_ops().unwrap();
    writer.close().unwrap();

    let contents = CowLogReader::read_all(&dir.path().join("system.cow")).unwrap();
    let labels = contents.labels();
    assert_eq!(labels, (1..=total as u64).collect::<Vec<_>>());
    assert_eq!(
        merged_image(&dir.path().join("system.cow"), &scenario),
        scenario.target
    );
}

#[test]
fn stale_label_is_init_error() {
    let scenario = random_scenario(7, "system", 16, 4);
    let dir = TempDir::new().unwrap();
    let source = scenario.write_source(dir.path());

    {
        let mut writer = file_writer(
            PartitionContext::new(BS).with_source(source.clone()),
            dir.path(),
            dir.path(),
            DurabilityMode::Always,
        );
        writer.init(&scenario.plan, true, 0).unwrap();
        run_ops(&mut writer, &scenario, 0, 1);
    }

    // A checkpoint the log has never seen
    let mut writer = file_writer(
        PartitionContext::new(BS).with_source(source),
        dir.path(),
        dir.path(),
        DurabilityMode::Always,
    );
    assert!(matches!(
        writer.init(&scenario.plan, true, 3),
        Err(Error::Init(_))
    ));
    writer.close().unwrap();
}
