//! Bounded in-memory tier
//!
//! The hot path of the cache: at most `max_size` entries, TTL-aware, and
//! evicting the least-recently-accessed entry when a new key arrives at
//! capacity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::{expiry_after, CachedValue, Payload};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Payload,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    /// Tie-breaker for entries touched within the same clock tick
    access_seq: u64,
}

impl MemoryEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.last_accessed_at, self.access_seq)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, MemoryEntry>,
    hits: u64,
    misses: u64,
    seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency())
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&victim);
        Some(victim)
    }
}

/// Memory tier statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before any lookup
    pub hit_rate: f64,
}

/// Bounded, TTL-aware, LRU-evicting key/value store
#[derive(Debug)]
pub struct MemoryTier {
    max_size: usize,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl MemoryTier {
    /// Creates a tier holding at most `max_size` entries (minimum 1)
    pub fn new(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_size: max_size.max(1),
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    /// Looks up `key`, dropping it if expired
    ///
    /// A hit refreshes the entry's recency; hits and misses are counted.
    pub fn get(&self, key: &str) -> Option<CachedValue> {
        let now = self.clock.now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let seq = inner.next_seq();

        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed_at = now;
                entry.access_seq = seq;
                let found = CachedValue {
                    value: entry.value.clone(),
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                };
                inner.hits += 1;
                return Some(found);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            log::debug!("memory tier: expired '{}'", key);
        }
        inner.misses += 1;
        None
    }

    /// Reads `key` without touching recency or the hit counters
    pub fn peek(&self, key: &str) -> Option<CachedValue> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| CachedValue {
                value: entry.value.clone(),
                created_at: entry.created_at,
                expires_at: entry.expires_at,
            })
    }

    /// Stores `value` under `key` for `ttl`
    pub fn set(&self, key: &str, value: Payload, ttl: Duration) {
        let now = self.clock.now();
        self.insert(key, value, expiry_after(now, ttl), now);
    }

    /// Stores `value` with explicit timestamps
    ///
    /// Used when promoting an entry from the persistent tier, so reported
    /// age stays relative to the original write and the entry never outlives
    /// its record.
    pub fn insert(
        &self,
        key: &str,
        value: Payload,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_size {
            if let Some(victim) = inner.evict_lru() {
                log::debug!("memory tier: evicted '{}'", victim);
            }
        }

        let access_seq = inner.next_seq();
        inner.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at,
                created_at,
                last_accessed_at: now,
                access_seq,
            },
        );
    }

    /// Removes `key`, returning whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Returns whether `key` holds an unexpired entry
    ///
    /// Does not touch recency or the hit counters.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };
        if expired {
            inner.entries.remove(key);
        }
        !expired
    }

    /// Removes every entry and resets the counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    /// Removes every entry whose key starts with `prefix`
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        before - inner.entries.len()
    }

    /// Removes every expired entry, returning how many were dropped
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        MemoryStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}
