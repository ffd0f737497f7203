//! Engine configuration via `kvbridge.toml`
//!
//! On first start a commented default file is written next to the
//! history directory; edit it and restart to change settings.

use std::path::{Path, PathBuf};

use kvbridge_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "kvbridge.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Server-info sampling settings (`[history]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Sample `server_info` while connected
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,
    /// Milliseconds between two samples
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Directory holding `<connection>.history` files
    #[serde(default = "default_history_dir")]
    pub directory: PathBuf,
}

fn default_history_enabled() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("history")
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
            interval_ms: default_interval_ms(),
            directory: default_history_dir(),
        }
    }
}

/// Engine configuration loaded from `kvbridge.toml`.
///
/// # Example
///
/// ```toml
/// log_level = "info"
/// default_scan_count = 100
///
/// [history]
/// enabled = true
/// interval_ms = 10000
/// directory = "history"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Page size for `SCAN` without `COUNT`
    #[serde(default = "default_scan_count")]
    pub default_scan_count: u64,
    /// Server-info history
    #[serde(default)]
    pub history: HistoryConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_scan_count() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_scan_count: default_scan_count(),
            history: HistoryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(Error::invalid_argument(format!(
                "Invalid log_level '{}' in kvbridge.toml. Expected one of {}.",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.default_scan_count == 0 {
            return Err(Error::invalid_argument(
                "default_scan_count in kvbridge.toml must be at least 1.",
            ));
        }
        if self.history.enabled && self.history.interval_ms == 0 {
            return Err(Error::invalid_argument(
                "history.interval_ms in kvbridge.toml must be at least 1.",
            ));
        }
        Ok(())
    }

    /// The default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# kvbridge engine configuration
#
# Log level: "trace", "debug", "info" (default), "warn" or "error"
log_level = "info"

# Page size used by SCAN when no COUNT is given
default_scan_count = 100

# Server statistics sampled while connected, one JSON line per sample
[history]
enabled = true
interval_ms = 10000
directory = "history"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `InvalidArgument` if it does not
    /// parse or holds invalid values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_argument(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| Error::Io {
                reason: format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ),
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to `path`.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::invalid_argument(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| Error::Io {
            reason: format!("Failed to write config file '{}': {}", path.display(), e),
        })
    }
}
