//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the API base URL, where sessions are stored, and the prefetch timing
//! knobs (default TTL, hover delay, per-resource TTL overrides).
//!
//! Configuration is stored at `~/.config/dashcache/config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "dashcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default time a fetched value stays fresh.
const DEFAULT_TTL_SECS: u64 = 300;

/// Default hover dwell before a speculative prefetch fires.
const DEFAULT_HOVER_DELAY_MS: u64 = 150;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file in the data directory
    #[default]
    File,
    /// A single entry in the OS keychain
    Keyring,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PrefetchConfig {
    pub default_ttl_secs: u64,
    pub hover_delay_ms: u64,
    /// Per-resource TTLs in seconds, keyed by resource identifier.
    pub ttl_overrides: BTreeMap<String, u64>,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            hover_delay_ms: DEFAULT_HOVER_DELAY_MS,
            ttl_overrides: BTreeMap::new(),
        }
    }
}

impl PrefetchConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn hover_delay(&self) -> Duration {
        Duration::from_millis(self.hover_delay_ms)
    }

    /// TTL for `key`: its override if one is configured, else the default.
    pub fn ttl_for(&self, key: &str) -> Duration {
        self.ttl_overrides
            .get(key)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| self.default_ttl())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub storage: StorageBackend,
    /// Overrides the platform data directory for session storage.
    pub data_dir: Option<PathBuf>,
    pub prefetch: PrefetchConfig,
    /// Sessions idle for longer than this are dropped at boot.
    pub session_max_idle_days: Option<i64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session table.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Idle window for pruning at boot. Non-positive or out-of-range day
    /// counts are ignored with a warning and prune nothing.
    pub fn session_max_idle(&self) -> Option<chrono::TimeDelta> {
        let days = self.session_max_idle_days?;
        if days <= 0 {
            warn!(days, "Ignoring non-positive session_max_idle_days");
            return None;
        }
        let window = chrono::TimeDelta::try_days(days);
        if window.is_none() {
            warn!(days, "Ignoring out-of-range session_max_idle_days");
        }
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_for_uses_override_then_default() {
        let mut prefetch = PrefetchConfig::default();
        prefetch.ttl_overrides.insert("analytics".to_string(), 30);

        assert_eq!(prefetch.ttl_for("analytics"), Duration::from_secs(30));
        assert_eq!(prefetch.ttl_for("users"), Duration::from_secs(DEFAULT_TTL_SECS));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.prefetch.hover_delay(), Duration::from_millis(150));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"storage":"keyring","prefetch":{"hover_delay_ms":80}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert_eq!(config.prefetch.hover_delay_ms, 80);
        assert_eq!(config.prefetch.default_ttl_secs, DEFAULT_TTL_SECS);
    }

    #[test]
    fn test_save_round_trip_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_base_url: Some("https://api.example.com".to_string()),
            session_max_idle_days: Some(14),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_session_max_idle_rejects_bad_values() {
        let window = |days| Config {
            session_max_idle_days: days,
            ..Config::default()
        }
        .session_max_idle();

        assert_eq!(window(Some(14)), chrono::TimeDelta::try_days(14));
        assert_eq!(window(None), None);
        assert_eq!(window(Some(0)), None);
        assert_eq!(window(Some(-3)), None);
        assert_eq!(window(Some(i64::MAX)), None);
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/dashcache-test")),
            ..Config::default()
        };
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/dashcache-test"));
    }
}
