//! Shared process state
//!
//! One [`Context`] is built at startup and handed to every collaborator. It
//! owns the cache and both governors, so tests can build a fresh, isolated
//! instance per case.

use std::sync::Arc;

use crate::cache::{MemoryTier, PersistentTier, TieredCache};
use crate::client::{Gate, UpstreamClient};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::ConfigError;
use crate::governor::{DailyBudget, SlidingWindowLimiter};
use crate::maintenance::SweepHandle;

/// Cache, budget and limiter shared by all upstream clients
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub cache: Arc<TieredCache>,
    /// Budget for the quota-scarce upstream
    pub daily_budget: Arc<DailyBudget>,
    /// Limiter for the burst-limited upstream
    pub burst_limiter: Arc<SlidingWindowLimiter>,
}

impl Context {
    /// Builds the context on the system clock
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Builds the context on a caller-supplied clock
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let persistent = match &config.cache.directory {
            Some(dir) => Some(PersistentTier::with_dir(dir.clone(), clock.clone())),
            None => PersistentTier::in_project_dirs(clock.clone()),
        };
        if persistent.is_none() {
            log::warn!("no cache directory available, running memory-only");
        }

        let cache = TieredCache::new(
            MemoryTier::new(config.cache.memory_max_size, clock.clone()),
            persistent,
            config.namespace_table(),
            clock.clone(),
        );
        let daily_budget = DailyBudget::new(
            config.daily.daily_limit,
            config.daily.reset_hour_utc,
            clock.clone(),
        );
        let burst_limiter = SlidingWindowLimiter::new(
            config.burst.max_requests,
            config.burst.window_ms,
            clock.clone(),
        );

        Ok(Self {
            config,
            clock,
            cache: Arc::new(cache),
            daily_budget: Arc::new(daily_budget),
            burst_limiter: Arc::new(burst_limiter),
        })
    }

    /// Client for the quota-scarce upstream
    pub fn daily_client(&self) -> UpstreamClient {
        UpstreamClient::new(Gate::Daily(self.daily_budget.clone()), self.cache.clone())
    }

    /// Client for the burst-limited upstream
    pub fn burst_client(&self) -> UpstreamClient {
        UpstreamClient::new(Gate::Burst(self.burst_limiter.clone()), self.cache.clone())
    }

    /// Starts the periodic cache sweep at the configured interval
    pub fn spawn_sweeper(&self) -> SweepHandle {
        SweepHandle::spawn(self.cache.clone(), self.config.sweep_interval())
    }
}
