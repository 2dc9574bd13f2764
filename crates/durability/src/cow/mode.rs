//! Durability mode configuration
//!
//! Controls when the COW log is fsynced. Independent of this mode, a
//! checkpoint always forces the log to stable storage before the checkpoint
//! index is persisted.

/// Durability mode for COW log appends
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Cache | Never (no file) | Everything |
/// | Always | Every append | Zero |
/// | Standard | Periodic + every checkpoint | Since last checkpoint or threshold |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// No log file is written; appends are counted and dropped.
    ///
    /// Use case: dry runs sizing the COW log, tests.
    Cache,

    /// fsync after every appended record.
    Always,

    /// fsync every N records OR every T milliseconds, and at every label.
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum records between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Whether this mode writes a log file at all.
    pub fn requires_log(&self) -> bool {
        !matches!(self, DurabilityMode::Cache)
    }

    /// Whether every append is fsynced immediately.
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Cache => "Cache (no log file, dry run)",
            DurabilityMode::Always => "Always sync (safest, slowest)",
            DurabilityMode::Standard { .. } => "Standard (sync at checkpoints and thresholds)",
        }
    }

    /// Standard mode with recommended defaults.
    ///
    /// Returns `Standard { interval_ms: 1000, batch_size: 4096 }`. The batch
    /// counts records; `CowLogConfig::sync_bytes` bounds the byte volume.
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 1000,
            batch_size: 4096,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::standard_default()
    }
}
