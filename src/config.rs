//! Runtime configuration
//!
//! Every setting has a default; an optional TOML file overrides any subset.
//! Namespaces listed in the file extend or replace the built-in table.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{NamespacePolicy, NamespaceTable};
use crate::error::ConfigError;

/// Longest accepted limiter window
pub const MAX_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cache: CacheSettings,
    /// Quota-scarce upstream
    pub daily: BudgetSettings,
    /// Burst-limited upstream
    pub burst: LimiterSettings,
}

/// Cache tier sizing and namespace policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Maximum entries held in memory
    pub memory_max_size: usize,
    /// Directory for persisted records; the platform cache dir when unset
    pub directory: Option<PathBuf>,
    /// TTL for namespaces missing from the table
    pub default_ttl_secs: u64,
    /// Interval between background sweeps
    pub sweep_interval_secs: u64,
    pub namespaces: BTreeMap<String, NamespaceSettings>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_max_size: 500,
            directory: None,
            default_ttl_secs: crate::cache::DEFAULT_TTL.as_secs(),
            sweep_interval_secs: 600,
            namespaces: BTreeMap::new(),
        }
    }
}

/// Policy for one namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceSettings {
    pub ttl_secs: u64,
    #[serde(default)]
    pub durable: bool,
}

/// Daily budget for the quota-scarce upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetSettings {
    pub daily_limit: u32,
    /// Hour (UTC, 0-23) at which the budget resets
    pub reset_hour_utc: u32,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            daily_limit: 100,
            reset_hour_utc: 0,
        }
    }
}

/// Sliding window for the burst-limited upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimiterSettings {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_ms: 1000,
        }
    }
}

impl Config {
    /// Parses and validates configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Rejects values the cache and governors cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.memory_max_size == 0 {
            return Err(ConfigError::Invalid(
                "cache.memory_max_size must be at least 1".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.daily.daily_limit == 0 {
            return Err(ConfigError::Invalid(
                "daily.daily_limit must be at least 1".to_string(),
            ));
        }
        if self.daily.reset_hour_utc > 23 {
            return Err(ConfigError::Invalid(format!(
                "daily.reset_hour_utc must be 0-23, got {}",
                self.daily.reset_hour_utc
            )));
        }
        if self.burst.max_requests == 0 || self.burst.window_ms == 0 {
            return Err(ConfigError::Invalid(
                "burst.max_requests and burst.window_ms must be at least 1".to_string(),
            ));
        }
        if self.burst.window_ms > MAX_WINDOW_MS {
            return Err(ConfigError::Invalid(format!(
                "burst.window_ms must be at most {} (24h), got {}",
                MAX_WINDOW_MS, self.burst.window_ms
            )));
        }
        Ok(())
    }

    /// Builds the namespace table: built-in defaults overlaid with the file
    pub fn namespace_table(&self) -> NamespaceTable {
        let fallback = NamespacePolicy::ephemeral(Duration::from_secs(self.cache.default_ttl_secs));
        self.cache.namespaces.iter().fold(
            NamespaceTable::default().with_fallback(fallback),
            |table, (name, settings)| {
                let ttl = Duration::from_secs(settings.ttl_secs);
                let policy = if settings.durable {
                    NamespacePolicy::durable(ttl)
                } else {
                    NamespacePolicy::ephemeral(ttl)
                };
                table.with(name.clone(), policy)
            },
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }
}
