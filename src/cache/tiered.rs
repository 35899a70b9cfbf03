//! Two-tier cache orchestration
//!
//! Lookups try the memory tier, then the persistent tier (promoting hits back
//! into memory). Writes always land in memory and, for durable namespaces,
//! on disk too. `get_or_fetch` ties lookup, upstream fetch and population
//! together, collapsing concurrent misses on one key into a single fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::{
    composite_key, expiry_after, CachedValue, MemoryStats, MemoryTier, NamespaceTable, Payload,
    PersistentStats, PersistentTier,
};
use crate::clock::Clock;

/// Result of a cache-only lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheLookup {
    pub value: Option<Payload>,
    pub from_cache: bool,
    /// Seconds since the value was first written, if found
    pub age_seconds: Option<u64>,
}

impl CacheLookup {
    fn miss() -> Self {
        Self {
            value: None,
            from_cache: false,
            age_seconds: None,
        }
    }
}

/// Result of a fetch-through lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Served {
    pub value: Payload,
    pub from_cache: bool,
    /// `None` for values fetched by this call
    pub age_seconds: Option<u64>,
}

/// Entries removed by a sweep, per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub memory_removed: usize,
    pub persistent_removed: usize,
}

/// Combined statistics for both tiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TieredStats {
    pub memory: MemoryStats,
    /// `None` when running memory-only
    pub persistent: Option<PersistentStats>,
}

type FlightTable = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one key's fetch gate and unregisters it on drop
///
/// Dropping also runs when the fetching future is cancelled mid-flight.
struct FlightGate<'a> {
    in_flight: &'a FlightTable,
    composite: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for FlightGate<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        // One reference in the map plus ours means nobody else is waiting
        if Arc::strong_count(&self.gate) <= 2 {
            in_flight.remove(self.composite);
        }
    }
}

/// Namespace-aware cache over a memory tier and an optional persistent tier
#[derive(Debug)]
pub struct TieredCache {
    memory: MemoryTier,
    persistent: Option<PersistentTier>,
    namespaces: NamespaceTable,
    clock: Arc<dyn Clock>,
    /// Per composite key gates for fetches in progress
    in_flight: FlightTable,
}

impl TieredCache {
    pub fn new(
        memory: MemoryTier,
        persistent: Option<PersistentTier>,
        namespaces: NamespaceTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            memory,
            persistent,
            namespaces,
            clock,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn persistent(&self) -> Option<&PersistentTier> {
        self.persistent.as_ref()
    }

    pub fn namespaces(&self) -> &NamespaceTable {
        &self.namespaces
    }

    fn age_seconds(&self, created_at: DateTime<Utc>) -> u64 {
        (self.clock.now() - created_at).num_seconds().max(0) as u64
    }

    /// Finds `composite` in either tier, promoting persistent hits
    ///
    /// `counted` selects whether the memory lookup updates recency and the
    /// hit/miss counters.
    fn lookup(&self, namespace: &str, composite: &str, counted: bool) -> Option<CachedValue> {
        let in_memory = if counted {
            self.memory.get(composite)
        } else {
            self.memory.peek(composite)
        };
        if in_memory.is_some() {
            return in_memory;
        }

        let found = self.persistent.as_ref()?.get(composite)?;
        // A promoted copy never outlives the record it came from
        let ttl = self.namespaces.policy(namespace).ttl;
        let expires_at = expiry_after(self.clock.now(), ttl).min(found.expires_at);
        self.memory
            .insert(composite, found.value.clone(), expires_at, found.created_at);
        log::debug!("promoted '{}' from disk to memory", composite);
        Some(found)
    }

    /// Looks up `key` in `namespace`
    pub fn get(&self, namespace: &str, key: &str) -> CacheLookup {
        let composite = composite_key(namespace, key);
        match self.lookup(namespace, &composite, true) {
            Some(found) => CacheLookup {
                value: Some(found.value),
                from_cache: true,
                age_seconds: Some(self.age_seconds(found.created_at)),
            },
            None => CacheLookup::miss(),
        }
    }

    /// Stores `value` under `key` in `namespace`
    ///
    /// The namespace TTL applies unless `ttl_override` is given. Durable
    /// namespaces are written through to disk; a failed disk write is logged
    /// by the persistent tier and otherwise ignored.
    pub fn set(&self, namespace: &str, key: &str, value: Payload, ttl_override: Option<Duration>) {
        let composite = composite_key(namespace, key);
        let policy = self.namespaces.policy(namespace);
        let ttl = ttl_override.unwrap_or(policy.ttl);

        if policy.durable {
            if let Some(persistent) = &self.persistent {
                persistent.set(&composite, &value, ttl);
            }
        }
        self.memory.set(&composite, value, ttl);
    }

    /// Returns whether either tier holds an unexpired entry for `key`
    pub fn has(&self, namespace: &str, key: &str) -> bool {
        let composite = composite_key(namespace, key);
        self.memory.has(&composite)
            || self
                .persistent
                .as_ref()
                .is_some_and(|persistent| persistent.has(&composite))
    }

    /// Removes `key` from both tiers, returning whether anything was removed
    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let composite = composite_key(namespace, key);
        let in_memory = self.memory.delete(&composite);
        let on_disk = self
            .persistent
            .as_ref()
            .is_some_and(|persistent| persistent.delete(&composite));
        in_memory || on_disk
    }

    fn flight_gate<'a>(&'a self, composite: &'a str) -> FlightGate<'a> {
        let mut in_flight = self.in_flight.lock();
        let gate = Arc::clone(
            in_flight
                .entry(composite.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        FlightGate {
            in_flight: &self.in_flight,
            composite,
            gate,
        }
    }

    /// Returns the cached value for `key`, fetching it on a miss
    ///
    /// `fetch` runs only when neither tier holds the key. Its result is
    /// stored through [`TieredCache::set`]; its error is returned unchanged
    /// and nothing is cached. Concurrent misses on the same key wait for the
    /// first fetch and are then served from the cache.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        namespace: &str,
        key: &str,
        fetch: F,
    ) -> Result<Served, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Payload, E>>,
    {
        let composite = composite_key(namespace, key);
        if let Some(found) = self.lookup(namespace, &composite, true) {
            return Ok(self.served_from_cache(found));
        }

        let flight = self.flight_gate(&composite);
        let result = {
            let _guard = flight.gate.lock().await;
            // A fetch that held the gate before us may have filled the entry
            match self.lookup(namespace, &composite, false) {
                Some(found) => Ok(self.served_from_cache(found)),
                None => {
                    log::debug!("cache miss for '{}', fetching upstream", composite);
                    match fetch().await {
                        Ok(value) => {
                            self.set(namespace, key, value.clone(), None);
                            Ok(Served {
                                value,
                                from_cache: false,
                                age_seconds: None,
                            })
                        }
                        Err(e) => Err(e),
                    }
                }
            }
        };
        drop(flight);
        result
    }

    fn served_from_cache(&self, found: CachedValue) -> Served {
        Served {
            age_seconds: Some(self.age_seconds(found.created_at)),
            value: found.value,
            from_cache: true,
        }
    }

    /// Sweeps expired entries from both tiers
    pub fn cleanup(&self) -> CleanupReport {
        CleanupReport {
            memory_removed: self.memory.cleanup(),
            persistent_removed: self
                .persistent
                .as_ref()
                .map_or(0, |persistent| persistent.cleanup()),
        }
    }

    /// Clears the cache
    ///
    /// Without a namespace both tiers are wiped. With one, only memory
    /// entries under `"{namespace}:"` are removed: disk records are addressed
    /// by hash and cannot be enumerated by namespace.
    pub fn clear(&self, namespace: Option<&str>) {
        match namespace {
            None => {
                self.memory.clear();
                if let Some(persistent) = &self.persistent {
                    persistent.clear();
                }
            }
            Some(namespace) => {
                let removed = self.memory.clear_prefix(&format!("{}:", namespace));
                log::debug!("cleared {} memory entries in '{}'", removed, namespace);
            }
        }
    }

    pub fn stats(&self) -> TieredStats {
        TieredStats {
            memory: self.memory.stats(),
            persistent: self.persistent.as_ref().map(PersistentTier::stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NamespacePolicy;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        cache: Arc<TieredCache>,
        clock: Arc<ManualClock>,
        _dir: TempDir,
    }

    fn fixture(max_size: usize) -> Fixture {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap(),
        ));
        let namespaces = NamespaceTable::new(NamespacePolicy::ephemeral(Duration::from_secs(30)))
            .with("disk", NamespacePolicy::durable(Duration::from_secs(3600)))
            .with("mem", NamespacePolicy::ephemeral(Duration::from_secs(60)));
        let cache = TieredCache::new(
            MemoryTier::new(max_size, clock.clone()),
            Some(PersistentTier::with_dir(dir.path().to_path_buf(), clock.clone())),
            namespaces,
            clock.clone(),
        );
        Fixture {
            cache: Arc::new(cache),
            clock,
            _dir: dir,
        }
    }

    #[test]
    fn test_get_after_set_until_expiry() {
        let f = fixture(10);
        f.cache.set("mem", "k", json!("v"), None);

        let hit = f.cache.get("mem", "k");
        assert_eq!(hit.value, Some(json!("v")));
        assert!(hit.from_cache);
        assert_eq!(hit.age_seconds, Some(0));

        f.clock.advance(chrono::Duration::seconds(60));
        assert_eq!(f.cache.get("mem", "k"), CacheLookup::miss());
    }

    #[test]
    fn test_same_key_in_two_namespaces_is_distinct() {
        let f = fixture(10);
        f.cache.set("mem", "k", json!(1), None);
        f.cache.set("disk", "k", json!(2), None);

        assert_eq!(f.cache.get("mem", "k").value, Some(json!(1)));
        assert_eq!(f.cache.get("disk", "k").value, Some(json!(2)));
    }

    #[test]
    fn test_only_durable_namespaces_reach_disk() {
        let f = fixture(10);
        f.cache.set("mem", "a", json!(1), None);
        f.cache.set("disk", "b", json!(2), None);

        let persistent = f.cache.persistent().unwrap();
        assert!(!persistent.has("mem:a"));
        assert!(persistent.has("disk:b"));
        assert_eq!(f.cache.stats().persistent.unwrap().count, 1);
    }

    #[test]
    fn test_unknown_namespace_uses_fallback_ttl() {
        let f = fixture(10);
        f.cache.set("other", "k", json!(true), None);

        f.clock.advance(chrono::Duration::seconds(29));
        assert!(f.cache.has("other", "k"));
        f.clock.advance(chrono::Duration::seconds(1));
        assert!(!f.cache.has("other", "k"));
    }

    #[test]
    fn test_ttl_override_wins() {
        let f = fixture(10);
        f.cache.set("mem", "k", json!(1), Some(Duration::from_secs(5)));

        f.clock.advance(chrono::Duration::seconds(5));
        assert!(f.cache.get("mem", "k").value.is_none());
    }

    #[test]
    fn test_persistent_hit_is_promoted_with_original_age() {
        let f = fixture(10);
        f.cache.set("disk", "k", json!({"items": []}), None);
        f.cache.memory().clear();

        f.clock.advance(chrono::Duration::seconds(600));
        let promoted = f.cache.get("disk", "k");
        assert_eq!(promoted.value, Some(json!({"items": []})));
        assert_eq!(promoted.age_seconds, Some(600));
        assert!(f.cache.memory().has("disk:k"));

        f.clock.advance(chrono::Duration::seconds(5));
        let from_memory = f.cache.get("disk", "k");
        assert_eq!(from_memory.age_seconds, Some(605));
        assert_eq!(f.cache.memory().stats().hits, 1);
    }

    #[test]
    fn test_promotion_keeps_record_expiry() {
        let f = fixture(10);
        f.cache.set("disk", "k", json!("v"), None);
        f.cache.memory().clear();

        f.clock.advance(chrono::Duration::seconds(3599));
        assert_eq!(f.cache.get("disk", "k").value, Some(json!("v")));
        let promoted = f.cache.memory().peek("disk:k").unwrap();
        assert_eq!(promoted.expires_at, promoted.created_at + chrono::Duration::seconds(3600));

        f.clock.advance(chrono::Duration::seconds(1));
        assert_eq!(f.cache.get("disk", "k"), CacheLookup::miss());

        f.clock.advance(chrono::Duration::seconds(3000));
        assert_eq!(f.cache.get("disk", "k"), CacheLookup::miss());
    }

    #[test]
    fn test_promotion_keeps_ttl_override() {
        let f = fixture(10);
        f.cache.set("disk", "k", json!(1), Some(Duration::from_secs(10)));
        f.cache.memory().clear();

        f.clock.advance(chrono::Duration::seconds(5));
        assert!(f.cache.get("disk", "k").value.is_some());

        f.clock.advance(chrono::Duration::seconds(5));
        assert!(f.cache.get("disk", "k").value.is_none());
    }

    #[tokio::test]
    async fn test_get_or_fetch_fetches_once() {
        let f = fixture(10);
        let calls = AtomicUsize::new(0);

        let first = f
            .cache
            .get_or_fetch("mem", "k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(json!("fresh"))
            })
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.age_seconds, None);

        f.clock.advance(chrono::Duration::seconds(3));
        let second = f
            .cache
            .get_or_fetch("mem", "k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(json!("other"))
            })
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.value, json!("fresh"));
        assert_eq!(second.age_seconds, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_caches_nothing_and_retries() {
        let f = fixture(10);

        let err = f
            .cache
            .get_or_fetch("disk", "k", || async { Err::<Payload, _>("upstream down") })
            .await
            .unwrap_err();
        assert_eq!(err, "upstream down");
        assert!(!f.cache.has("disk", "k"));
        assert_eq!(f.cache.stats().persistent.unwrap().count, 0);

        let retried = f
            .cache
            .get_or_fetch("disk", "k", || async { Ok::<_, &str>(json!(42)) })
            .await
            .unwrap();
        assert_eq!(retried.value, json!(42));
        assert!(!retried.from_cache);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let f = fixture(10);
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&f.cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch("mem", "hot", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(json!("shared"))
                        })
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        for result in results {
            assert_eq!(result.unwrap().unwrap().value, json!("shared"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(f.cache.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_fetches_release_their_gates() {
        let f = fixture(10);

        for i in 0..50 {
            let outcome = tokio::time::timeout(
                Duration::from_millis(1),
                f.cache.get_or_fetch("mem", &format!("slow{}", i), || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, String>(json!("late"))
                }),
            )
            .await;
            assert!(outcome.is_err());
        }

        assert!(f.cache.in_flight.lock().is_empty());
        assert!(!f.cache.has("mem", "slow0"));
    }

    #[test]
    fn test_clear_namespace_only_touches_memory() {
        let f = fixture(10);
        f.cache.set("disk", "a", json!(1), None);
        f.cache.set("mem", "b", json!(2), None);

        f.cache.clear(Some("disk"));
        assert!(!f.cache.memory().has("disk:a"));
        assert!(f.cache.memory().has("mem:b"));
        assert!(f.cache.persistent().unwrap().has("disk:a"));

        f.cache.clear(None);
        assert!(!f.cache.has("disk", "a"));
        assert!(!f.cache.has("mem", "b"));
    }

    #[test]
    fn test_cleanup_reports_per_tier() {
        let f = fixture(10);
        f.cache.set("mem", "a", json!(1), None);
        f.cache.set("disk", "b", json!(2), Some(Duration::from_secs(10)));
        f.cache.set("disk", "c", json!(3), None);

        f.clock.advance(chrono::Duration::seconds(120));
        let report = f.cache.cleanup();
        assert_eq!(
            report,
            CleanupReport {
                memory_removed: 2,
                persistent_removed: 1,
            }
        );
        assert!(f.cache.has("disk", "c"));
    }

    #[test]
    fn test_delete_removes_from_both_tiers() {
        let f = fixture(10);
        f.cache.set("disk", "k", json!(1), None);

        assert!(f.cache.delete("disk", "k"));
        assert!(!f.cache.has("disk", "k"));
        assert!(!f.cache.delete("disk", "k"));
    }

    #[test]
    fn test_memory_only_cache() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = TieredCache::new(
            MemoryTier::new(2, clock.clone()),
            None,
            NamespaceTable::default(),
            clock,
        );
        cache.set("daily:search", "k", json!(1), None);

        assert_eq!(cache.get("daily:search", "k").value, Some(json!(1)));
        assert!(cache.stats().persistent.is_none());
        assert_eq!(cache.cleanup().persistent_removed, 0);
    }
}
