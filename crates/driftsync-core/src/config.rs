//! Configuration module for driftsync.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, and defaults. The configuration is an
//! explicit value passed into the orchestrator at construction; there is no
//! process-wide config singleton.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for driftsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub conflicts: ConflictsConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Metadata store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between timer-driven scan/poll cycles per folder.
    pub poll_interval_secs: u64,
    /// Watcher debounce window in milliseconds: duplicate notifications for
    /// the same (path, action) within this window are suppressed.
    pub debounce_ms: u64,
    /// Size of the transfer worker pool shared across all folders.
    pub max_concurrent_transfers: usize,
    /// Consecutive failed cycles before a folder degrades to error status.
    pub max_failed_cycles: u32,
}

/// Retry/backoff settings for remote operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per operation (no further attempt after the last).
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds; doubles per
    /// attempt afterwards.
    pub initial_delay_ms: u64,
}

impl RetryConfig {
    /// The configured initial delay as a `Duration`.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Conflict resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Strategy assigned to newly added folders: `last_write_wins`,
    /// `local_wins`, `remote_wins`, `keep_both`, or `manual`.
    pub default_strategy: String,
}

/// Remote store adapter selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Adapter name. The engine core ships only `memory` (an in-process
    /// loopback store); production adapters are linked in by the shell.
    pub adapter: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/driftsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("driftsync")
            .join("config.yaml")
    }

    /// Validate the configuration, returning every problem found.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.sync.poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.sync.max_concurrent_transfers == 0 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_transfers".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.sync.max_failed_cycles == 0 {
            errors.push(ValidationError {
                field: "sync.max_failed_cycles".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            errors.push(ValidationError {
                field: "retry.max_attempts".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self
            .conflicts
            .default_strategy
            .parse::<crate::domain::conflict::ConflictStrategy>()
            .is_err()
        {
            errors.push(ValidationError {
                field: "conflicts.default_strategy".to_string(),
                message: format!(
                    "unknown strategy '{}'; valid: last_write_wins, local_wins, \
                     remote_wins, keep_both, manual",
                    self.conflicts.default_strategy
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("driftsync")
                .join("driftsync.db"),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            debounce_ms: 500,
            max_concurrent_transfers: 4,
            max_failed_cycles: 3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            default_strategy: "last_write_wins".to_string(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            adapter: "memory".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.poll_interval_secs, 30);
        assert_eq!(config.sync.debounce_ms, 500);
        assert_eq!(config.sync.max_concurrent_transfers, 4);
        assert_eq!(config.sync.max_failed_cycles, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.conflicts.default_strategy, "last_write_wins");
        assert_eq!(config.remote.adapter, "memory");
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn test_validate_catches_zeroes() {
        let mut config = Config::default();
        config.sync.poll_interval_secs = 0;
        config.retry.max_attempts = 0;

        let errors = config.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.field == "sync.poll_interval_secs"));
        assert!(errors.iter().any(|e| e.field == "retry.max_attempts"));
    }

    #[test]
    fn test_validate_catches_bad_strategy() {
        let mut config = Config::default();
        config.conflicts.default_strategy = "coin_flip".to_string();

        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "conflicts.default_strategy");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "sync:\n  poll_interval_secs: 5\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.sync.poll_interval_secs, 5);
        // Unspecified sections fall back to defaults
        assert_eq!(config.sync.debounce_ms, 500);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/driftsync.yaml"));
        assert_eq!(config.sync.poll_interval_secs, 30);
    }

    #[test]
    fn test_default_path_is_nonempty() {
        assert!(!Config::default_path().as_os_str().is_empty());
    }
}
