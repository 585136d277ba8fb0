//! Configuration file support for dosewatch.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/dosewatch/config.toml`.
//! The adherence windows are global defaults, not per-medication settings.

use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub adherence: AdherenceConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Adherence windows and thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdherenceConfig {
    /// How long after a slot a report is still accepted before the sweep marks it missed
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: i64,

    /// Reports later than this are classified late
    #[serde(default = "default_late_threshold_minutes")]
    pub late_threshold_minutes: i64,

    /// Repeated taken reports inside this window are rejected as duplicates
    #[serde(default = "default_duplicate_window_minutes")]
    pub duplicate_window_minutes: i64,

    /// Stock below this emits an inventory-low audit event
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: u32,
}

impl Default for AdherenceConfig {
    fn default() -> Self {
        Self {
            grace_minutes: default_grace_minutes(),
            late_threshold_minutes: default_late_threshold_minutes(),
            duplicate_window_minutes: default_duplicate_window_minutes(),
            low_stock_threshold: default_low_stock_threshold(),
        }
    }
}

impl AdherenceConfig {
    pub fn grace(&self) -> Duration {
        Duration::minutes(self.grace_minutes)
    }

    pub fn late_threshold(&self) -> Duration {
        Duration::minutes(self.late_threshold_minutes)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::minutes(self.duplicate_window_minutes)
    }
}

/// Sweeper scheduling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Previous local days also checked for overdue slots
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            lookback_days: default_lookback_days(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds)
    }
}

/// Store locking and transaction bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Longest wait for any file lock (store document or outbox)
    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_timeout_ms)
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|_| PathBuf::from("."))
    });
    base.join("dosewatch")
}

fn default_grace_minutes() -> i64 {
    120
}

fn default_late_threshold_minutes() -> i64 {
    30
}

fn default_duplicate_window_minutes() -> i64 {
    10
}

fn default_low_stock_threshold() -> u32 {
    5
}

fn default_interval_seconds() -> u64 {
    3600
}

fn default_lookback_days() -> u32 {
    1
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_transaction_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        base.join("dosewatch").join("config.toml")
    }

    /// Reject windows that would make classification meaningless
    pub fn validate(&self) -> Result<()> {
        let a = &self.adherence;
        if a.grace_minutes <= 0 {
            return Err(Error::Config("grace_minutes must be positive".into()));
        }
        if a.late_threshold_minutes < 0 || a.duplicate_window_minutes < 0 {
            return Err(Error::Config(
                "late_threshold_minutes and duplicate_window_minutes must not be negative".into(),
            ));
        }
        if a.late_threshold_minutes > a.grace_minutes {
            return Err(Error::Config(
                "late_threshold_minutes must not exceed grace_minutes".into(),
            ));
        }
        if self.sweep.interval_seconds == 0 {
            return Err(Error::Config("sweep interval_seconds must be positive".into()));
        }
        Ok(())
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

/// File layout under the data directory
#[derive(Clone, Debug)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the store document and its lock file
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    pub fn sweep_lock(&self) -> PathBuf {
        self.root.join("sweep.lock")
    }

    pub fn outbox(&self) -> PathBuf {
        self.root.join("outbox").join("notifications.jsonl")
    }

    pub fn guardians(&self) -> PathBuf {
        self.root.join("guardians.json")
    }
}
