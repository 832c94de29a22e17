//! # vrift-config
//!
//! Configuration management for Velo Rift cookie sync.
//!
//! Loads configuration from:
//! 1. `~/.vrift/config.toml` (global)
//! 2. `.vrift/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::logging::LogLevel;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub watch: WatchConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from standard locations, then apply `VRIFT_*` env overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(
            Self::global_config_path().as_deref(),
            Some(Path::new(".vrift/config.toml")),
        )?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from explicit global/project files only.
    ///
    /// Missing files are skipped and the process environment is not consulted. Keys present in the project file replace the
    /// same keys from the global file; everything else keeps its global value.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut table = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Table = toml::from_str(&contents)?;
                merge_tables(&mut table, layer);
            }
        }

        Ok(toml::Value::Table(table).try_into()?)
    }

    /// Global config path: ~/.vrift/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vrift/config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `VRIFT_*` overrides looked up through `var`
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(prefix) = var("VRIFT_COOKIE_PREFIX") {
            if !prefix.is_empty() {
                self.sync.cookie_prefix = prefix;
            }
        }
        if let Some(timeout) = var("VRIFT_SYNC_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.sync.default_timeout_ms = ms;
            }
        }
        if let Some(level) = var("VRIFT_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&level) {
                self.log.level = level;
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Overlay `over` onto `base`, recursing into nested tables.
fn merge_tables(base: &mut toml::Table, over: toml::Table) {
    for (key, value) in over {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Cookie sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Leading part of every cookie file name (host and pid are appended)
    pub cookie_prefix: String,
    /// Timeout used by `sync_to_now_default`
    pub default_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cookie_prefix: ".vrift-cookie-".to_string(),
            default_timeout_ms: 60_000,
        }
    }
}

impl SyncConfig {
    pub fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.default_timeout_ms)
    }
}

/// FS watch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Interval between event-queue drains in the watch task
    pub tick_ms: u64,
    /// Poll interval for the polling notify backend
    pub poll_interval_ms: u64,
    /// Path components or `*.ext` globs never reported as changes
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            poll_interval_ms: 2000,
            ignore_patterns: vec![".vrift".to_string(), ".DS_Store".to_string()],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}
