//! COW log corruption and crash tests
//!
//! These tests verify that:
//! - CRC32 detects bit flips in any record kind
//! - A torn tail is dropped and everything before it survives
//! - Resuming at a label discards the torn or unfinished tail
//! - Replaying a resumed log matches replaying an uninterrupted one

use deltacow_core::CowEntry;
use deltacow_durability::{
    CowLogConfig, CowLogReader, CowLogWriter, CowRecord, DurabilityMode, ReadStopReason,
    ReplayImage, COW_HEADER_SIZE,
};
use proptest::prelude::*;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::TempDir;

const BLOCK: u32 = 512;

fn create(path: &Path) -> CowLogWriter {
    CowLogWriter::create(path, BLOCK, DurabilityMode::Always, CowLogConfig::for_testing()).unwrap()
}

fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    std::io::Read::read_exact(&mut file, &mut byte).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[byte[0] ^ 0x40]).unwrap();
}

#[test]
fn test_crc_detects_bit_flip_in_each_kind() {
    let records = vec![
        CowEntry::Copy {
            source_block: 3,
            dest_block: 4,
        },
        CowEntry::Replace {
            dest_block: 5,
            data: vec![0xAB; BLOCK as usize],
        },
        CowEntry::Zero { dest_block: 6 },
    ];

    for (i, entry) in records.iter().enumerate() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flip.cow");
        {
            let mut writer = create(&path);
            writer.append_entry(entry).unwrap();
            writer.close().unwrap();
        }

        // Flip a byte in the last body byte before the CRC
        let len = std::fs::metadata(&path).unwrap().len();
        flip_byte(&path, len - 5);

        let contents = CowLogReader::read_all(&path).unwrap();
        assert!(contents.records.is_empty(), "record {} survived a flip", i);
        assert_eq!(
            contents.stop_reason,
            ReadStopReason::ChecksumMismatch {
                offset: COW_HEADER_SIZE as u64
            }
        );
    }
}

#[test]
fn test_corruption_preserves_earlier_records() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("partial.cow");
    let boundary;
    {
        let mut writer = create(&path);
        writer.append_entry(&CowEntry::Zero { dest_block: 0 }).unwrap();
        writer.add_label(1).unwrap();
        writer.close().unwrap();
        boundary = std::fs::metadata(&path).unwrap().len();
    }
    {
        let mut writer =
            CowLogWriter::open_append(&path, BLOCK, 1, DurabilityMode::Always, CowLogConfig::for_testing())
                .unwrap();
        writer.append_entry(&CowEntry::Zero { dest_block: 1 }).unwrap();
        writer.close().unwrap();
    }
    flip_byte(&path, boundary + 6);

    let contents = CowLogReader::read_all(&path).unwrap();
    assert_eq!(
        contents.records,
        vec![
            CowRecord::Entry(CowEntry::Zero { dest_block: 0 }),
            CowRecord::Label(1)
        ]
    );
    assert_eq!(contents.valid_end, boundary);
}

#[test]
fn test_resume_discards_torn_tail() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("torn.cow");
    {
        let mut writer = create(&path);
        writer.append_entry(&CowEntry::Zero { dest_block: 0 }).unwrap();
        writer.add_label(1).unwrap();
        writer.append_entry(&CowEntry::Zero { dest_block: 1 }).unwrap();
        writer.close().unwrap();
    }
    // Simulate a crash in the middle of the next record
    {
        let tail = CowRecord::Entry(CowEntry::Zero { dest_block: 2 }).to_bytes();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&tail[..5]).unwrap();
    }

    let mut writer =
        CowLogWriter::open_append(&path, BLOCK, 1, DurabilityMode::Always, CowLogConfig::for_testing())
            .unwrap();
    writer.append_entry(&CowEntry::Zero { dest_block: 1 }).unwrap();
    writer.finalize().unwrap();
    writer.close().unwrap();

    let contents = CowLogReader::read_all(&path).unwrap();
    assert_eq!(contents.stop_reason, ReadStopReason::EndOfData);
    assert_eq!(
        contents.entries().cloned().collect::<Vec<_>>(),
        vec![
            CowEntry::Zero { dest_block: 0 },
            CowEntry::Zero { dest_block: 1 }
        ]
    );
    assert!(contents.is_finalized());
}

#[test]
fn test_empty_log_has_no_records() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("empty.cow");
    create(&path).close().unwrap();

    let contents = CowLogReader::read_all(&path).unwrap();
    assert!(contents.records.is_empty());
    assert_eq!(contents.valid_end, COW_HEADER_SIZE as u64);
    assert!(!contents.is_finalized());
}

fn entry_strategy(num_blocks: u64) -> impl Strategy<Value = CowEntry> {
    prop_oneof![
        (0..num_blocks, 0..num_blocks).prop_map(|(s, d)| CowEntry::Copy {
            source_block: s,
            dest_block: d
        }),
        (0..num_blocks, any::<u8>()).prop_map(|(d, fill)| CowEntry::Replace {
            dest_block: d,
            data: vec![fill; BLOCK as usize]
        }),
        (0..num_blocks).prop_map(|d| CowEntry::Zero { dest_block: d }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Stopping after a label and resuming yields the same image as writing
    /// the whole log in one go.
    #[test]
    fn prop_resume_replays_like_uninterrupted(
        first in prop::collection::vec(entry_strategy(8), 0..12),
        lost in prop::collection::vec(entry_strategy(8), 0..6),
        second in prop::collection::vec(entry_strategy(8), 0..12),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("prop.cow");
        {
            let mut writer = create(&path);
            for e in &first { writer.append_entry(e).unwrap(); }
            writer.add_label(1).unwrap();
            for e in &lost { writer.append_entry(e).unwrap(); }
            writer.close().unwrap();
        }
        {
            let mut writer = CowLogWriter::open_append(
                &path, BLOCK, 1, DurabilityMode::Always, CowLogConfig::for_testing(),
            ).unwrap();
            for e in &second { writer.append_entry(e).unwrap(); }
            writer.finalize().unwrap();
            writer.close().unwrap();
        }

        let base: Vec<u8> = (0..8u8).flat_map(|b| vec![b; BLOCK as usize]).collect();

        let contents = CowLogReader::read_all(&path).unwrap();
        let mut resumed = ReplayImage::new(base.clone(), BLOCK).unwrap();
        resumed.replay(contents.entries()).unwrap();

        let mut direct = ReplayImage::new(base, BLOCK).unwrap();
        direct.replay(first.iter().chain(second.iter())).unwrap();

        prop_assert_eq!(resumed.as_bytes(), direct.as_bytes());
    }
}
