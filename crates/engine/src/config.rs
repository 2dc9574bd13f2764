//! Writer configuration via `deltacow.toml`
//!
//! Durability and COW log buffering are read from a small TOML file. A
//! missing file can be created with the commented defaults.

use deltacow_durability::{CowLogConfig, CowLogConfigError, CowLogDir, DurabilityMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "deltacow.toml";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("Failed to access config file '{}': {source}", .path.display())]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// Unknown durability mode string
    #[error("Invalid durability mode '{0}'. Expected \"standard\", \"always\" or \"cache\".")]
    InvalidDurability(String),

    /// COW log settings rejected
    #[error("Invalid COW log settings: {0}")]
    CowLog(#[from] CowLogConfigError),
}

/// Writer configuration loaded from `deltacow.toml`.
///
/// # Example
///
/// ```toml
/// durability = "standard"
/// sync_interval_ms = 1000
/// sync_batch_size = 4096
/// buffer_size = 1048576
/// sync_bytes = 16777216
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    /// Durability mode: `"standard"`, `"always"` or `"cache"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Standard mode: maximum milliseconds between fsyncs.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Standard mode: maximum records between fsyncs.
    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,
    /// COW log write buffer in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Standard mode: maximum bytes between fsyncs.
    #[serde(default = "default_sync_bytes")]
    pub sync_bytes: u64,
}

fn default_durability_str() -> String {
    "standard".to_string()
}

fn default_sync_interval_ms() -> u64 {
    1000
}

fn default_sync_batch_size() -> usize {
    4096
}

fn default_buffer_size() -> usize {
    CowLogConfig::default().buffer_size
}

fn default_sync_bytes() -> u64 {
    CowLogConfig::default().sync_bytes
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            durability: default_durability_str(),
            sync_interval_ms: default_sync_interval_ms(),
            sync_batch_size: default_sync_batch_size(),
            buffer_size: default_buffer_size(),
            sync_bytes: default_sync_bytes(),
        }
    }
}

impl WriterConfig {
    /// Parse the durability string into a `DurabilityMode`.
    pub fn durability_mode(&self) -> Result<DurabilityMode, ConfigError> {
        match self.durability.as_str() {
            "standard" => Ok(DurabilityMode::Standard {
                interval_ms: self.sync_interval_ms,
                batch_size: self.sync_batch_size,
            }),
            "always" => Ok(DurabilityMode::Always),
            "cache" => Ok(DurabilityMode::Cache),
            other => Err(ConfigError::InvalidDurability(other.to_string())),
        }
    }

    /// COW log settings.
    pub fn cow_log_config(&self) -> CowLogConfig {
        CowLogConfig::new()
            .with_buffer_size(self.buffer_size)
            .with_sync_bytes(self.sync_bytes)
    }

    /// Check every setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.durability_mode()?;
        self.cow_log_config().validate()?;
        Ok(())
    }

    /// File-backed sink provider writing logs under `dir`.
    pub fn cow_log_dir(&self, dir: impl Into<PathBuf>) -> Result<CowLogDir, ConfigError> {
        Ok(CowLogDir::new(dir)
            .with_durability(self.durability_mode()?)
            .with_config(self.cow_log_config()))
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# deltacow writer configuration
#
# Durability mode: "standard" (default), "always" or "cache"
#   "standard" = fsync at checkpoints and every interval/batch
#   "always"   = fsync every COW log record
#   "cache"    = no COW log file (dry run)
durability = "standard"

# Standard mode thresholds
sync_interval_ms = 1000
sync_batch_size = 4096
sync_bytes = 16777216

# COW log write buffer in bytes (minimum 4096)
buffer_size = 1048576
"#
    }

    /// Parse config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: WriterConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}
