//! On-disk byte formats for the COW log.
//!
//! Serialization is kept separate from operational logic (how the log is
//! opened, appended and synced) so format evolution stays in one place.
//!
//! # Module Structure
//!
//! - `cow_record`: COW log header and record format

pub mod cow_record;

pub use cow_record::{
    CowLogHeader, CowRecord, CowRecordError, COW_HEADER_SIZE, COW_LOG_FORMAT_VERSION, COW_MAGIC,
    COW_RECORD_FORMAT_VERSION, MAX_RECORD_LEN,
};
