//! Plans and configuration loaded from disk
//!
//! The plan travels as JSON and the writer settings as `deltacow.toml`, the
//! way an update client hands them over.

use crate::common::*;
use deltacow::OperationType;
use tempfile::TempDir;

#[test]
fn json_plan_and_default_config() {
    init_tracing();
    let scenario = random_scenario(77, "product", 24, 8);
    let dir = TempDir::new().unwrap();

    let plan_path = dir.path().join("product.json");
    std::fs::write(&plan_path, scenario.plan.to_json().unwrap()).unwrap();
    let plan = PartitionPlan::from_file(&plan_path).unwrap();
    assert_eq!(plan, scenario.plan);

    let config_path = dir.path().join(deltacow_engine::CONFIG_FILE_NAME);
    WriterConfig::write_default_if_missing(&config_path).unwrap();
    let config = WriterConfig::from_file(&config_path).unwrap();
    assert_eq!(config, WriterConfig::default());

    let source = scenario.write_source(dir.path());
    let mut writer = PartitionWriter::new(
        PartitionContext::new(BS).with_source(source),
        Box::new(config.cow_log_dir(dir.path().join("cow")).unwrap()),
        Box::new(FileCheckpointStore::new(dir.path()).unwrap()),
    );
    writer.init(&plan, true, 0).unwrap();
    run_ops(&mut writer, &scenario, 0, plan.operations.len());
    writer.finished_install_ops().unwrap();
    writer.close().unwrap();

    assert_eq!(
        merged_image(&dir.path().join("cow").join("product.cow"), &scenario),
        scenario.target
    );
}

#[test]
fn json_plan_drives_writer() {
    let json = r#"{
        "partition_name": "boot",
        "target_size": 2048,
        "operations": [
            {"type": "discard", "dst_extents": [{"start_block": 3, "num_blocks": 1}]},
            {"type": "source_copy",
             "src_extents": [{"start_block": 0, "num_blocks": 2}],
             "dst_extents": [{"start_block": 1, "num_blocks": 2}]}
        ]
    }"#;
    let plan = PartitionPlan::from_json(json).unwrap();
    assert_eq!(plan.operations[0].op_type, OperationType::Discard);
    assert_eq!(plan.operations[1].src_sha256, None);

    let source: Vec<u8> = (0..4u8).flat_map(|b| vec![b; BS as usize]).collect();
    let sinks = MemorySinkProvider::new();
    let mut writer = PartitionWriter::new(
        PartitionContext::new(BS).with_source(Box::new(MemorySource::new(source.clone()))),
        Box::new(sinks.clone()),
        Box::new(MemoryCheckpointStore::new()),
    );
    writer.init(&plan, true, 0).unwrap();
    for op in &plan.operations {
        writer.apply(op, &[]).unwrap();
    }
    writer.finished_install_ops().unwrap();

    let entries = sinks.handle("boot").unwrap().entries();
    assert_eq!(
        entries,
        vec![
            CowEntry::Zero { dest_block: 3 },
            CowEntry::Copy {
                source_block: 0,
                dest_block: 1
            },
            CowEntry::Replace {
                dest_block: 2,
                data: vec![1u8; BS as usize]
            },
        ]
    );
}

#[test]
fn invalid_geometry_rejected_at_init() {
    let plan = PartitionPlan::from_json(
        r#"{"partition_name": "boot", "target_size": 1000, "operations": []}"#,
    )
    .unwrap();
    let mut writer = PartitionWriter::new(
        PartitionContext::new(BS),
        Box::new(MemorySinkProvider::new()),
        Box::new(MemoryCheckpointStore::new()),
    );
    let err = writer.init(&plan, false, 0).unwrap_err();
    assert_eq!(err.code(), deltacow::ErrorCode::InitError);
}
