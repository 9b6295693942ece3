//! Backing tier interface
//!
//! Each tier is a store specialized for one access pattern. The core only
//! talks to tiers through [`TierAdapter`], so any store that satisfies the
//! contract can be plugged in without touching routing or consolidation.
//!
//! Contract:
//! - `put` is idempotent per `(record.id, tier)`: a re-put overwrites.
//! - `search` treats `min_weight` as a hard floor against the last weight
//!   the tier was given, filtering client-side when the store cannot filter
//!   natively.
//! - `set_weight` keeps that weight in step with the record store; the cache
//!   calls it after every recall and every decay.
//! - `remove` is a logical demotion out of the tier; the record itself
//!   survives in the record store.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::memory::types::{MemoryRecord, TierId};
use crate::router::Transformation;

pub use memory::InMemoryTier;

/// Payload written to one tier, shaped by the routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPayload {
    /// Weight of the record at the time of the write
    pub weight: f32,
    /// Tier-specific shaping instructions
    pub transformation: Transformation,
}

/// Handle to a record's projection inside one tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierRecordRef {
    pub tier: TierId,
    pub record_id: Uuid,
    /// Tier-native key
    pub key: String,
}

/// A single search hit from one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierHit {
    pub record_id: Uuid,
    pub tier: TierId,
    /// Similarity or match score in `[0, 1]`
    pub score: f32,
    /// Weight as known to the tier
    pub weight: f32,
    pub tier_ref: TierRecordRef,
}

/// Capability interface every backing store implements
#[async_trait]
pub trait TierAdapter: Send + Sync {
    /// The tier this adapter serves
    fn id(&self) -> TierId;

    /// Write (or overwrite) a record's projection
    async fn put(&self, record: &MemoryRecord, payload: &TierPayload) -> Result<TierRecordRef>;

    /// Find records matching `query` with tier weight at or above `min_weight`
    async fn search(&self, query: &str, min_weight: f32, limit: usize) -> Result<Vec<TierHit>>;

    /// Replace the weight the tier holds for a record; unknown ids are ignored
    async fn set_weight(&self, record_id: Uuid, weight: f32) -> Result<()>;

    /// Tell the tier a record was recalled and now carries `weight`
    async fn reinforce(&self, record_id: Uuid, weight: f32) -> Result<()> {
        self.set_weight(record_id, weight).await
    }

    /// Logically remove a record from this tier
    async fn remove(&self, record_id: Uuid) -> Result<()>;
}

/// Success/failure counters for one tier
#[derive(Debug, Default)]
struct TierHealth {
    successes: AtomicU64,
    failures: AtomicU64,
    last_error: Mutex<Option<(DateTime<Utc>, String)>>,
}

/// Point-in-time view of a tier's health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierHealthSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl TierHealthSnapshot {
    /// A tier is healthy until its most recent call failed
    pub fn is_healthy(&self) -> bool {
        self.failures == 0 || self.last_error.is_none()
    }
}

#[derive(Clone)]
struct RegisteredTier {
    adapter: Arc<dyn TierAdapter>,
    health: Arc<TierHealth>,
}

/// The set of tiers the cache fans out to, with per-tier health
#[derive(Clone, Default)]
pub struct TierRegistry {
    tiers: BTreeMap<TierId, RegisteredTier>,
}

impl TierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous adapter for the same tier
    pub fn with_tier(mut self, adapter: Arc<dyn TierAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn TierAdapter>) {
        let id = adapter.id();
        self.tiers.insert(
            id,
            RegisteredTier {
                adapter,
                health: Arc::new(TierHealth::default()),
            },
        );
    }

    /// A registry holding an [`InMemoryTier`] for every tier id
    pub fn in_memory() -> Self {
        TierId::ALL.iter().fold(Self::new(), |registry, id| {
            registry.with_tier(Arc::new(InMemoryTier::new(*id)))
        })
    }

    pub fn get(&self, tier: TierId) -> Option<Arc<dyn TierAdapter>> {
        self.tiers.get(&tier).map(|t| Arc::clone(&t.adapter))
    }

    pub fn contains(&self, tier: TierId) -> bool {
        self.tiers.contains_key(&tier)
    }

    /// Registered tier ids in ascending order
    pub fn ids(&self) -> Vec<TierId> {
        self.tiers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Push a record's current weight to every registered tier it is assigned to
    ///
    /// `recalled` selects `reinforce` over `set_weight`. Returns the tiers
    /// that rejected the update; those failures also count against health.
    pub async fn sync_weight(&self, record: &MemoryRecord, recalled: bool) -> Vec<(TierId, String)> {
        let calls = record.tier_assignments.iter().filter_map(|tier| {
            self.get(*tier).map(|adapter| async move {
                let result = if recalled {
                    adapter.reinforce(record.id, record.weight).await
                } else {
                    adapter.set_weight(record.id, record.weight).await
                };
                (*tier, result)
            })
        });

        let mut failed = Vec::new();
        for (tier, result) in futures::future::join_all(calls).await {
            if let Err(e) = result {
                let reason = e.to_string();
                self.record_failure(tier, &reason);
                failed.push((tier, reason));
            }
        }
        failed
    }

    pub fn record_success(&self, tier: TierId) {
        if let Some(t) = self.tiers.get(&tier) {
            t.health.successes.fetch_add(1, Ordering::Relaxed);
            let mut last = match t.health.last_error.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *last = None;
        }
    }

    pub fn record_failure(&self, tier: TierId, reason: &str) {
        if let Some(t) = self.tiers.get(&tier) {
            t.health.failures.fetch_add(1, Ordering::Relaxed);
            let mut last = match t.health.last_error.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *last = Some((Utc::now(), reason.to_string()));
        }
    }

    /// Health snapshot of every registered tier
    pub fn health(&self) -> BTreeMap<TierId, TierHealthSnapshot> {
        self.tiers
            .iter()
            .map(|(id, t)| {
                let last = match t.health.last_error.lock() {
                    Ok(guard) => guard.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                let snapshot = TierHealthSnapshot {
                    successes: t.health.successes.load(Ordering::Relaxed),
                    failures: t.health.failures.load(Ordering::Relaxed),
                    last_error_at: last.as_ref().map(|(at, _)| *at),
                    last_error: last.map(|(_, reason)| reason),
                };
                (*id, snapshot)
            })
            .collect()
    }
}

impl std::fmt::Debug for TierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierRegistry")
            .field("tiers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_registry_has_every_tier() {
        let registry = TierRegistry::in_memory();
        assert_eq!(registry.ids(), TierId::ALL.to_vec());
        for id in TierId::ALL {
            assert_eq!(registry.get(id).unwrap().id(), id);
        }
    }

    #[test]
    fn test_health_counters() {
        let registry = TierRegistry::new().with_tier(Arc::new(InMemoryTier::new(TierId::Working)));

        registry.record_failure(TierId::Working, "connection refused");
        let health = registry.health();
        let working = &health[&TierId::Working];
        assert_eq!(working.failures, 1);
        assert_eq!(working.last_error.as_deref(), Some("connection refused"));
        assert!(!working.is_healthy());

        registry.record_success(TierId::Working);
        let working = registry.health()[&TierId::Working].clone();
        assert_eq!(working.successes, 1);
        assert!(working.last_error.is_none());
        assert!(working.is_healthy());
    }

    #[test]
    fn test_unregistered_tier_is_ignored() {
        let registry = TierRegistry::new();
        registry.record_failure(TierId::Semantic, "nope");
        assert!(registry.health().is_empty());
        assert!(registry.get(TierId::Semantic).is_none());
    }
}
