//! Configuration file management for the emergency detector.
//!
//! Reads/writes `~/.aed/config.yaml` with the observer position, watched
//! categories, range limit, dedup TTL and notification settings. The loader
//! validates everything up front; the classifier never re-checks it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::types::{AedError, AlarmType, MicECategory, Position, Result};

/// Default dedup window: 8 hours.
pub const DEFAULT_TTL_MINUTES: u32 = 8 * 60;

/// Default upper bound on tracked sources.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Everything the classification core consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub observer: Position,
    pub active_categories: BTreeSet<MicECategory>,
    /// `None` = unlimited.
    #[serde(default)]
    pub range_limit_km: Option<f64>,
    #[serde(default)]
    pub extended_mode: bool,
    /// Only consulted when `extended_mode` is on.
    #[serde(default)]
    pub extended_alarm_categories: BTreeSet<AlarmType>,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_ttl_minutes() -> u32 {
    DEFAULT_TTL_MINUTES
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl WatchConfig {
    pub fn new(observer: Position, active_categories: BTreeSet<MicECategory>) -> Self {
        WatchConfig {
            observer,
            active_categories,
            range_limit_km: None,
            extended_mode: false,
            extended_alarm_categories: BTreeSet::new(),
            ttl_minutes: DEFAULT_TTL_MINUTES,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.ttl_minutes))
    }

    /// Reject configurations the core cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.observer.is_valid() {
            return Err(AedError::Config(format!(
                "invalid observer position {}",
                self.observer
            )));
        }
        if self.active_categories.is_empty() {
            return Err(AedError::Config(
                "at least one Mic-E category needs to be specified".into(),
            ));
        }
        if let Some(limit) = self.range_limit_km {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(AedError::Config(format!("invalid range limit {limit} km")));
            }
        }
        if self.ttl_minutes == 0 {
            return Err(AedError::Config("ttl_minutes must be positive".into()));
        }
        if self.cache_capacity == 0 {
            return Err(AedError::Config("cache_capacity must be positive".into()));
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig::new(
            Position::new(51.838879, 8.32678),
            BTreeSet::from([MicECategory::Priority, MicECategory::Emergency]),
        )
    }
}

/// Unit system for rendered distances and speeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

/// Full configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub units: Units,
    /// Webhook URL for JSON notifications.
    #[serde(default)]
    pub webhook: Option<String>,
}

/// Get the config directory path (`~/.aed/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".aed")
}

/// Get the default config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AedError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_config(&text)
}

/// Parse and validate config text.
pub fn parse_config(text: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(text)?;
    config.watch.validate()?;
    Ok(config)
}

/// Write a config file, creating the parent directory if needed.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let text = format!(
        "# aprs emergency detector configuration\n{}",
        serde_yaml::to_string(config)?
    );
    std::fs::write(path, text)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
