//! Namespace TTL policy
//!
//! A namespace scopes key uniqueness and selects how long entries live and
//! whether they are written through to disk.

use std::collections::BTreeMap;
use std::time::Duration;

/// Fallback TTL for namespaces missing from the table
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Per-namespace caching policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespacePolicy {
    /// Lifetime of entries written under the namespace
    pub ttl: Duration,
    /// Whether entries are also written to the persistent tier
    pub durable: bool,
}

impl NamespacePolicy {
    /// Memory-only policy with the given TTL
    pub const fn ephemeral(ttl: Duration) -> Self {
        Self {
            ttl,
            durable: false,
        }
    }

    /// Policy that writes through to disk
    pub const fn durable(ttl: Duration) -> Self {
        Self { ttl, durable: true }
    }
}

/// Static namespace → policy table, fixed at startup
#[derive(Debug, Clone)]
pub struct NamespaceTable {
    policies: BTreeMap<String, NamespacePolicy>,
    fallback: NamespacePolicy,
}

impl Default for NamespaceTable {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(
            "daily:search".to_string(),
            NamespacePolicy::durable(Duration::from_secs(6 * 3600)),
        );
        policies.insert(
            "daily:item".to_string(),
            NamespacePolicy::durable(Duration::from_secs(24 * 3600)),
        );
        policies.insert(
            "burst:search".to_string(),
            NamespacePolicy::ephemeral(Duration::from_secs(5 * 60)),
        );
        policies.insert(
            "burst:item".to_string(),
            NamespacePolicy::ephemeral(Duration::from_secs(15 * 60)),
        );
        Self {
            policies,
            fallback: NamespacePolicy::ephemeral(DEFAULT_TTL),
        }
    }
}

impl NamespaceTable {
    /// Creates an empty table where every namespace gets `fallback`
    pub fn new(fallback: NamespacePolicy) -> Self {
        Self {
            policies: BTreeMap::new(),
            fallback,
        }
    }

    /// Adds or replaces the policy for `namespace`
    pub fn with(mut self, namespace: impl Into<String>, policy: NamespacePolicy) -> Self {
        self.policies.insert(namespace.into(), policy);
        self
    }

    /// Replaces the fallback policy used for unknown namespaces
    pub fn with_fallback(mut self, fallback: NamespacePolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Resolves the policy for `namespace`; unknown namespaces never fail
    pub fn policy(&self, namespace: &str) -> NamespacePolicy {
        match self.policies.get(namespace) {
            Some(policy) => *policy,
            None => {
                log::debug!("no TTL policy for namespace '{}', using fallback", namespace);
                self.fallback
            }
        }
    }

    /// Iterates over the configured namespaces
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NamespacePolicy)> {
        self.policies.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Builds the internal `"{namespace}:{key}"` key
pub fn composite_key(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_marks_daily_namespaces_durable() {
        let table = NamespaceTable::default();
        assert!(table.policy("daily:search").durable);
        assert!(table.policy("daily:item").durable);
        assert!(!table.policy("burst:search").durable);
        assert_eq!(table.policy("burst:item").ttl, Duration::from_secs(900));
    }

    #[test]
    fn test_unknown_namespace_falls_back() {
        let table = NamespaceTable::default();
        let policy = table.policy("nobody:knows");
        assert_eq!(policy, NamespacePolicy::ephemeral(DEFAULT_TTL));
    }

    #[test]
    fn test_builder_overrides_entries_and_fallback() {
        let table = NamespaceTable::new(NamespacePolicy::ephemeral(Duration::from_secs(1)))
            .with("a", NamespacePolicy::durable(Duration::from_secs(60)))
            .with_fallback(NamespacePolicy::ephemeral(Duration::from_secs(30)));

        assert_eq!(table.policy("a").ttl, Duration::from_secs(60));
        assert_eq!(table.policy("b").ttl, Duration::from_secs(30));
        assert_eq!(table.iter().count(), 1);
    }

    #[test]
    fn test_composite_key_separates_namespaces() {
        assert_eq!(composite_key("daily:search", "bike"), "daily:search:bike");
        assert_ne!(composite_key("a", "k"), composite_key("b", "k"));
    }
}
