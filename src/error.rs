//! Error types surfaced to callers
//!
//! Cache misses are not errors, and persistent-tier I/O failures are
//! recovered inside the cache. What remains is quota exhaustion, upstream
//! failures and bad configuration.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::governor::Budget;

/// Errors from a quota-gated upstream call
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The daily budget is spent; retrying before `reset_time` is pointless
    #[error("Daily quota exhausted ({used}/{daily_limit} calls used), resets at {reset_time}")]
    QuotaExhausted {
        used: u32,
        daily_limit: u32,
        reset_time: DateTime<Utc>,
    },

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("Upstream returned {status} for {url}")]
    Status { status: u16, url: String },

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    Parse(#[from] serde_json::Error),
}

impl GatewayError {
    /// Builds the exhaustion error from a denying budget snapshot
    pub fn quota_exhausted(budget: Budget) -> Self {
        Self::QuotaExhausted {
            used: budget.used,
            daily_limit: budget.daily_limit,
            reset_time: budget.reset_time,
        }
    }

    /// Whether the failure is quota exhaustion rather than an upstream fault
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. })
    }
}

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for the expected layout
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
