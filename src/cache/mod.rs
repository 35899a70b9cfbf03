//! Tiered cache for upstream API responses
//!
//! A bounded memory tier sits in front of an unbounded on-disk tier. Both are
//! TTL-aware and address entries by `"{namespace}:{key}"`. The
//! [`TieredCache`] composes them, applies per-namespace TTL policy and offers
//! a fetch-through operation that only reaches upstream on a genuine miss.
//!
//! Values are opaque JSON payloads; the cache never inspects them.

mod memory;
mod namespace;
mod persistent;
mod tiered;

use std::time::Duration;

use chrono::{DateTime, Utc};

pub use memory::{MemoryStats, MemoryTier};
pub use namespace::{composite_key, NamespacePolicy, NamespaceTable, DEFAULT_TTL};
pub use persistent::{PersistentStats, PersistentTier};
pub use tiered::{CacheLookup, CleanupReport, Served, TieredCache, TieredStats};

/// Opaque cached value
pub type Payload = serde_json::Value;

/// A value read from either tier along with its timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Payload,
    /// When the value was first written to any tier
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Computes `now + ttl`, saturating instead of overflowing
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
