//! Command-line interface parsing for marketgate
//!
//! This module handles parsing of CLI arguments using clap, and folds the
//! global flags into the loaded [`Config`].

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use thiserror::Error;

use crate::config::Config;
use crate::error::ConfigError;

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A fetch target is not of the form KEY=URL
    #[error("Invalid fetch target: '{0}'. Expected KEY=URL")]
    InvalidTarget(String),
}

/// marketgate - quota-governed cache in front of marketplace search APIs
#[derive(Parser, Debug)]
#[command(name = "marketgate")]
#[command(about = "Quota-governed, tiered cache for marketplace search APIs")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for persisted cache records
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum entries held in memory
    #[arg(long, global = true, value_name = "N")]
    pub memory_size: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Which upstream a fetch goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Source {
    /// Quota-scarce upstream (daily budget, fails fast)
    Daily,
    /// Burst-limited upstream (sliding window, waits)
    Burst,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show cache, budget and limiter statistics
    Stats,
    /// Remove expired and corrupt cache entries
    Cleanup,
    /// Clear the whole cache, or one namespace's memory entries
    Clear {
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Look up a cached value without calling upstream
    Get { namespace: String, key: String },
    /// Serve values from cache, fetching misses from upstream
    ///
    /// Examples:
    ///   marketgate fetch --source daily daily:search bike=https://api.example.com/search?q=bike
    ///   marketgate fetch --source burst burst:item 42=https://api.example.com/items/42 43=...
    Fetch {
        #[arg(long, value_enum)]
        source: Source,
        namespace: String,
        /// One or more KEY=URL pairs, fetched concurrently
        #[arg(required = true, value_name = "KEY=URL")]
        targets: Vec<String>,
    },
}

/// A key and the upstream URL that produces its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub key: String,
    pub url: String,
}

/// Parses a `KEY=URL` argument
///
/// Splits on the first `=`, so URLs may contain further `=` characters.
pub fn parse_target(s: &str) -> Result<FetchTarget, CliError> {
    match s.split_once('=') {
        Some((key, url)) if !key.is_empty() && !url.is_empty() => Ok(FetchTarget {
            key: key.to_string(),
            url: url.to_string(),
        }),
        _ => Err(CliError::InvalidTarget(s.to_string())),
    }
}

impl Cli {
    /// Log level selected by the `-v` flags
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }

    /// Loads the config file (if any) and applies flag overrides
    pub fn resolve_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(dir) = &self.cache_dir {
            config.cache.directory = Some(dir.clone());
        }
        if let Some(size) = self.memory_size {
            config.cache.memory_max_size = size;
        }
        config.validate()?;
        Ok(config)
    }
}
