//! Quota-aware upstream client
//!
//! Wraps one upstream JSON API behind its governor: the quota-scarce source
//! fails fast once its daily budget is spent, the burst-limited source waits
//! for a free slot. Request building and response interpretation belong to
//! the marketplace adapters; this client deals in URLs and opaque JSON.

use std::sync::Arc;

use reqwest::Client;

use crate::cache::{Payload, Served, TieredCache};
use crate::error::GatewayError;
use crate::governor::{DailyBudget, SlidingWindowLimiter};

/// Governor guarding an upstream
#[derive(Debug, Clone)]
pub enum Gate {
    /// Hard daily ceiling; exhaustion is an immediate error
    Daily(Arc<DailyBudget>),
    /// Short sliding window; callers wait for capacity
    Burst(Arc<SlidingWindowLimiter>),
}

/// Client for one rate-governed upstream API
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http_client: Client,
    gate: Gate,
    cache: Arc<TieredCache>,
}

impl UpstreamClient {
    /// Creates a client with a default HTTP client
    pub fn new(gate: Gate, cache: Arc<TieredCache>) -> Self {
        Self::with_client(Client::new(), gate, cache)
    }

    /// Creates a client with a custom HTTP client
    pub fn with_client(http_client: Client, gate: Gate, cache: Arc<TieredCache>) -> Self {
        Self {
            http_client,
            gate,
            cache,
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Consumes one unit of the governor, immediately before dispatch
    async fn admit(&self) -> Result<(), GatewayError> {
        match &self.gate {
            Gate::Daily(budget) => match budget.try_acquire() {
                Ok(after) => {
                    log::debug!("daily budget: {}/{} used", after.used, after.daily_limit);
                    Ok(())
                }
                Err(denied) => {
                    log::warn!(
                        "daily budget exhausted ({}/{}), refusing upstream call until {}",
                        denied.used,
                        denied.daily_limit,
                        denied.reset_time
                    );
                    Err(GatewayError::quota_exhausted(denied))
                }
            },
            Gate::Burst(limiter) => {
                limiter.throttle().await;
                Ok(())
            }
        }
    }

    /// Performs one governed GET and decodes the JSON body
    ///
    /// # Returns
    /// * `Ok(Payload)` - The decoded response body
    /// * `Err(GatewayError::QuotaExhausted)` - No call was made
    /// * `Err(GatewayError)` - The call was made (and counted) but failed
    pub async fn fetch_json(&self, url: &str) -> Result<Payload, GatewayError> {
        self.admit().await?;

        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Serves `key` from the cache, calling `url` only on a miss
    pub async fn cached_fetch(
        &self,
        namespace: &str,
        key: &str,
        url: &str,
    ) -> Result<Served, GatewayError> {
        self.cache
            .get_or_fetch(namespace, key, || self.fetch_json(url))
            .await
    }
}
