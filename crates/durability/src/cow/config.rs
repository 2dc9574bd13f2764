//! COW log configuration.

/// COW log configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CowLogConfig {
    /// Userspace write buffer in bytes (default: 1MB).
    pub buffer_size: usize,

    /// Bytes between fsyncs in Standard mode (default: 16MB).
    ///
    /// Checked in addition to the mode's record and time thresholds.
    pub sync_bytes: u64,
}

impl Default for CowLogConfig {
    fn default() -> Self {
        CowLogConfig {
            buffer_size: 1024 * 1024,     // 1MB
            sync_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl CowLogConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the write buffer size (builder pattern).
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the Standard-mode byte threshold (builder pattern).
    pub fn with_sync_bytes(mut self, bytes: u64) -> Self {
        self.sync_bytes = bytes;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), CowLogConfigError> {
        if self.buffer_size < 4096 {
            return Err(CowLogConfigError::BufferTooSmall);
        }
        if self.sync_bytes < self.buffer_size as u64 {
            return Err(CowLogConfigError::SyncBytesBelowBuffer);
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (small buffers).
    pub fn for_testing() -> Self {
        CowLogConfig {
            buffer_size: 8 * 1024,
            sync_bytes: 64 * 1024,
        }
    }
}

/// COW log configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CowLogConfigError {
    /// Write buffer is too small (minimum 4KB).
    #[error("Write buffer must be at least 4KB")]
    BufferTooSmall,

    /// Byte sync threshold is below the write buffer size.
    #[error("Sync byte threshold cannot be smaller than the write buffer")]
    SyncBytesBelowBuffer,
}
