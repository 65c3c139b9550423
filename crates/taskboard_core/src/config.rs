//! Runtime configuration loaded from TOML.
//!
//! Every section and field has a default, so an empty file is valid.

use crate::logging::default_log_level;
use crate::retention::DEFAULT_RETENTION_DAYS;
use crate::sync::reconcile::DEFAULT_DEBOUNCE_SECS;
use crate::sync::retry::{Backoff, RetryPolicy};
use crate::sync::SyncSettings;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DB_FILE_NAME: &str = "taskboard.sqlite3";
const MAX_POLL_INTERVAL_SECS: u64 = 3600;
const MAX_RETENTION_DAYS: u32 = 36_500;
const MAX_SWEEP_INTERVAL_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub db_file_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            db_file_name: DEFAULT_DB_FILE_NAME.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Directory replicated between devices; no provider when unset.
    pub cloud_dir: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub debounce_window_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub startup_timeout_ms: u64,
    pub retention_days: u32,
    pub sweep_interval_hours: u64,
    pub auto_push: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cloud_dir: None,
            poll_interval_secs: 15,
            debounce_window_secs: DEFAULT_DEBOUNCE_SECS as u64,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            startup_timeout_ms: 5000,
            retention_days: DEFAULT_RETENTION_DAYS as u32,
            sweep_interval_hours: 24,
            auto_push: true,
        }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            debounce_window: chrono::Duration::seconds(clamp_secs(config.debounce_window_secs)),
            retry: RetryPolicy {
                max_attempts: config.retry_attempts,
                delay: Duration::from_millis(config.retry_delay_ms),
                backoff: Backoff::Fixed,
            },
            startup_timeout: Duration::from_millis(config.startup_timeout_ms),
            retention: chrono::Duration::days(i64::from(config.retention_days)),
            maintenance_interval: Duration::from_secs(
                config.sweep_interval_hours.saturating_mul(60 * 60),
            ),
            auto_push: config.auto_push,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Falls back to `default_log_level()`.
    pub level: Option<String>,
    /// File logging is off when unset.
    pub log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn effective_level(&self) -> &str {
        self.level.as_deref().unwrap_or_else(|| default_log_level())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Invalid { field: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config TOML: {err}"),
            Self::Invalid { field, message } => write!(f, "invalid `{field}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

impl CoreConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.db_file_name.trim().is_empty() {
            return Err(invalid("storage.db_file_name", "must not be empty"));
        }

        let sync = &self.sync;
        if !(1..=MAX_POLL_INTERVAL_SECS).contains(&sync.poll_interval_secs) {
            return Err(invalid(
                "sync.poll_interval_secs",
                format!("must be within 1..={MAX_POLL_INTERVAL_SECS}"),
            ));
        }
        let bounded = [
            ("sync.retention_days", u64::from(sync.retention_days), u64::from(MAX_RETENTION_DAYS)),
            ("sync.sweep_interval_hours", sync.sweep_interval_hours, MAX_SWEEP_INTERVAL_HOURS),
        ];
        for (field, value, max) in bounded {
            if !(1..=max).contains(&value) {
                return Err(invalid(field, format!("must be within 1..={max}")));
            }
        }
        let positive = [
            ("sync.debounce_window_secs", sync.debounce_window_secs),
            ("sync.retry_attempts", u64::from(sync.retry_attempts)),
            ("sync.retry_delay_ms", sync.retry_delay_ms),
            ("sync.startup_timeout_ms", sync.startup_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }

        if let Some(dir) = &self.sync.cloud_dir {
            if dir.as_os_str().is_empty() {
                return Err(invalid("sync.cloud_dir", "must not be empty when set"));
            }
        }
        Ok(())
    }
}

fn clamp_secs(secs: u64) -> i64 {
    // chrono::Duration::seconds panics past i64::MAX milliseconds.
    i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000)
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}
