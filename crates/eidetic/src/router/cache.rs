//! Routing decision cache
//!
//! Decisions are keyed by content fingerprint and expire after a fixed TTL.
//! The map is sharded, so lookups for unrelated fingerprints never contend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::memory::types::StoreContext;
use crate::router::RoutingDecision;

/// Hex SHA-256 over the content prefix, declared type and context
pub fn fingerprint(content: &str, content_type: &str, context: &StoreContext, prefix_chars: usize) -> String {
    let prefix: String = content.chars().take(prefix_chars).collect();
    let context_digest = serde_json::to_string(context).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update([0x1f]);
    hasher.update(content_type.trim().to_lowercase().as_bytes());
    hasher.update([0x1f]);
    hasher.update(context_digest.as_bytes());

    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Clone)]
struct CachedDecision {
    decision: RoutingDecision,
    inserted_at: Instant,
}

/// Counters for cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL cache of routing decisions
#[derive(Debug)]
pub struct DecisionCache {
    entries: DashMap<String, CachedDecision>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a live decision, evicting it if expired
    pub fn get(&self, key: &str) -> Option<RoutingDecision> {
        let live = self.entries.get(key).map(|entry| {
            (entry.inserted_at.elapsed() < self.ttl).then(|| entry.decision.clone())
        });

        match live {
            Some(Some(decision)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(decision)
            }
            Some(None) => {
                self.entries
                    .remove_if(key, |_, entry| entry.inserted_at.elapsed() >= self.ttl);
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: String, decision: RoutingDecision) {
        self.entries.insert(
            key,
            CachedDecision {
                decision,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Urgency;
    use crate::router::RoutingEngine;

    fn decision() -> RoutingDecision {
        RoutingEngine::default().fallback_decision("content", &StoreContext::default())
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let ctx = StoreContext::new().with_urgency(Urgency::High);
        let a = fingerprint("same content", "insight", &ctx, 256);
        let b = fingerprint("same content", "Insight ", &ctx, 256);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_inputs() {
        let ctx = StoreContext::new();
        let base = fingerprint("content", "insight", &ctx, 256);
        assert_ne!(base, fingerprint("other", "insight", &ctx, 256));
        assert_ne!(base, fingerprint("content", "semantic", &ctx, 256));
        assert_ne!(
            base,
            fingerprint("content", "insight", &ctx.clone().with_priority(0.9), 256)
        );
    }

    #[test]
    fn test_fingerprint_uses_prefix_only() {
        let ctx = StoreContext::new();
        assert_eq!(
            fingerprint("abcdef-tail-one", "x", &ctx, 6),
            fingerprint("abcdef-tail-two", "x", &ctx, 6)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = DecisionCache::new(Duration::from_secs(3600));
        cache.insert("key".to_string(), decision());

        assert!(cache.get("key").is_some());
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(cache.get("key").is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("key").is_none());
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let cache = DecisionCache::new(Duration::from_secs(10));
        cache.insert("old".to_string(), decision());
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.insert("new".to_string(), decision());

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_and_hit_rate() {
        let cache = DecisionCache::new(Duration::from_secs(60));
        cache.insert("a".to_string(), decision());
        cache.get("a");
        cache.get("missing");
        assert!((cache.stats().hit_rate() - 0.5).abs() < 1e-9);

        cache.clear();
        assert!(cache.is_empty());
    }
}
