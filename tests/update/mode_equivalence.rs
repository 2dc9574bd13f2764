//! Durability Mode Equivalence Tests
//!
//! Verifies that Always and Standard modes write identical logs for the same
//! plan, and that Cache mode runs the same plan without a log file.

use crate::common::*;
use deltacow::CowRecord;
use tempfile::TempDir;

fn records_for(scenario: &Scenario, durability: DurabilityMode) -> Vec<CowRecord> {
    let dir = TempDir::new().unwrap();
    let source = scenario.write_source(dir.path());
    let mut writer = file_writer(
        PartitionContext::new(BS).with_source(source),
        &dir.path().join("cow"),
        dir.path(),
        durability,
    );
    writer.init(&scenario.plan, true, 0).unwrap();
    run_ops(&mut writer, scenario, 0, scenario.num_ops());
    writer.finished_install_ops().unwrap();
    writer.close().unwrap();

    CowLogReader::read_all(&dir.path().join("cow").join("vendor.cow"))
        .unwrap()
        .records
}

#[test]
fn always_and_standard_write_identical_logs() {
    init_tracing();
    for seed in [3u64, 11, 29] {
        let scenario = random_scenario(seed, "vendor", 24, 10);
        let always = records_for(&scenario, DurabilityMode::Always);
        let standard = records_for(
            &scenario,
            DurabilityMode::Standard {
                interval_ms: 0,
                batch_size: 3,
            },
        );
        assert_eq!(always, standard, "seed {}", seed);
        assert!(matches!(always.last(), Some(CowRecord::Footer { .. })));
    }
}

#[test]
fn cache_mode_writes_no_log() {
    let scenario = random_scenario(5, "vendor", 24, 10);
    let dir = TempDir::new().unwrap();
    let source = scenario.write_source(dir.path());
    let cow_dir = dir.path().join("cow");

    let mut writer = file_writer(
        PartitionContext::new(BS).with_source(source),
        &cow_dir,
        dir.path(),
        DurabilityMode::Cache,
    );
    writer.init(&scenario.plan, true, 0).unwrap();
    run_ops(&mut writer, &scenario, 0, scenario.num_ops());
    writer.finished_install_ops().unwrap();

    let counters = writer.counters();
    assert_eq!(counters.ops_applied, scenario.num_ops() as u64);
    assert_eq!(counters.labels, scenario.num_ops() as u64);
    writer.close().unwrap();

    assert!(!cow_dir.join("vendor.cow").exists());
}
