use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// Location of the shared key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("duel_stats.json")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Runtime intervals and capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Backstop rescan interval for result markers.
    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,
    /// Delay between a marker-adding mutation and the rescan it triggers.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How often the page snapshot file is re-read.
    #[serde(default = "default_page_poll_ms")]
    pub page_poll_ms: u64,
    #[serde(default = "default_currency_poll_secs")]
    pub currency_poll_secs: u64,
    /// How often the store is checked for writes from other processes.
    #[serde(default = "default_store_poll_ms")]
    pub store_poll_ms: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    #[serde(default = "default_temp_max_age_secs")]
    pub temp_max_age_secs: u64,
    /// Ids remembered per dedup scope.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_bootstrap_attempts")]
    pub bootstrap_attempts: u32,
    #[serde(default = "default_bootstrap_interval_ms")]
    pub bootstrap_interval_ms: u64,
}

fn default_rescan_interval_ms() -> u64 {
    2000
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_page_poll_ms() -> u64 {
    250
}

fn default_currency_poll_secs() -> u64 {
    5
}

fn default_store_poll_ms() -> u64 {
    1000
}

fn default_gc_interval_secs() -> u64 {
    300
}

fn default_temp_max_age_secs() -> u64 {
    300
}

fn default_dedup_capacity() -> usize {
    crate::dedup::DEFAULT_CAPACITY
}

fn default_bootstrap_attempts() -> u32 {
    30
}

fn default_bootstrap_interval_ms() -> u64 {
    500
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            rescan_interval_ms: default_rescan_interval_ms(),
            debounce_ms: default_debounce_ms(),
            page_poll_ms: default_page_poll_ms(),
            currency_poll_secs: default_currency_poll_secs(),
            store_poll_ms: default_store_poll_ms(),
            gc_interval_secs: default_gc_interval_secs(),
            temp_max_age_secs: default_temp_max_age_secs(),
            dedup_capacity: default_dedup_capacity(),
            bootstrap_attempts: default_bootstrap_attempts(),
            bootstrap_interval_ms: default_bootstrap_interval_ms(),
        }
    }
}

impl SettingsConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn page_poll_interval(&self) -> Duration {
        Duration::from_millis(self.page_poll_ms)
    }

    pub fn currency_poll_interval(&self) -> Duration {
        Duration::from_secs(self.currency_poll_secs)
    }

    pub fn store_poll_interval(&self) -> Duration {
        Duration::from_millis(self.store_poll_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn bootstrap_interval(&self) -> Duration {
        Duration::from_millis(self.bootstrap_interval_ms)
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
