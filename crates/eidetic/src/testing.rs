//! Test doubles for tiers and classifiers
//!
//! Deterministic stand-ins used by unit and integration tests:
//! - tiers that always fail, answer slowly, or fail a fixed number of times
//! - classifiers that fail or return fixed signals

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{EideticError, Result};
use crate::memory::types::{MemoryRecord, TierId};
use crate::router::{ContentClassifier, ContentSignals};
use crate::tier::{InMemoryTier, TierAdapter, TierHit, TierPayload, TierRecordRef};

/// Tier whose every call fails with `TierUnavailable`
#[derive(Debug)]
pub struct FailingTier {
    id: TierId,
    reason: String,
}

impl FailingTier {
    pub fn new(id: TierId) -> Self {
        Self::with_reason(id, "connection refused")
    }

    pub fn with_reason(id: TierId, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> Result<T> {
        Err(EideticError::TierUnavailable {
            tier: self.id,
            reason: self.reason.clone(),
        })
    }
}

#[async_trait]
impl TierAdapter for FailingTier {
    fn id(&self) -> TierId {
        self.id
    }

    async fn put(&self, _record: &MemoryRecord, _payload: &TierPayload) -> Result<TierRecordRef> {
        self.fail()
    }

    async fn search(&self, _query: &str, _min_weight: f32, _limit: usize) -> Result<Vec<TierHit>> {
        self.fail()
    }

    async fn set_weight(&self, _record_id: Uuid, _weight: f32) -> Result<()> {
        self.fail()
    }

    async fn remove(&self, _record_id: Uuid) -> Result<()> {
        self.fail()
    }
}

/// In-memory tier that sleeps before every call
#[derive(Debug)]
pub struct SlowTier {
    inner: InMemoryTier,
    delay: Duration,
}

impl SlowTier {
    pub fn new(id: TierId, delay: Duration) -> Self {
        Self {
            inner: InMemoryTier::new(id),
            delay,
        }
    }

    pub fn inner(&self) -> &InMemoryTier {
        &self.inner
    }
}

#[async_trait]
impl TierAdapter for SlowTier {
    fn id(&self) -> TierId {
        self.inner.id()
    }

    async fn put(&self, record: &MemoryRecord, payload: &TierPayload) -> Result<TierRecordRef> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(record, payload).await
    }

    async fn search(&self, query: &str, min_weight: f32, limit: usize) -> Result<Vec<TierHit>> {
        tokio::time::sleep(self.delay).await;
        self.inner.search(query, min_weight, limit).await
    }

    async fn set_weight(&self, record_id: Uuid, weight: f32) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_weight(record_id, weight).await
    }

    async fn remove(&self, record_id: Uuid) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.remove(record_id).await
    }
}

/// In-memory tier that fails its first `failures` calls
#[derive(Debug)]
pub struct FlakyTier {
    inner: InMemoryTier,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyTier {
    pub fn new(id: TierId, failures: usize) -> Self {
        Self {
            inner: InMemoryTier::new(id),
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    /// Total calls received, failed or not
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(EideticError::TierUnavailable {
                tier: self.inner.id(),
                reason: format!("transient failure {}", call + 1),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TierAdapter for FlakyTier {
    fn id(&self) -> TierId {
        self.inner.id()
    }

    async fn put(&self, record: &MemoryRecord, payload: &TierPayload) -> Result<TierRecordRef> {
        self.check()?;
        self.inner.put(record, payload).await
    }

    async fn search(&self, query: &str, min_weight: f32, limit: usize) -> Result<Vec<TierHit>> {
        self.check()?;
        self.inner.search(query, min_weight, limit).await
    }

    async fn set_weight(&self, record_id: Uuid, weight: f32) -> Result<()> {
        self.check()?;
        self.inner.set_weight(record_id, weight).await
    }

    async fn remove(&self, record_id: Uuid) -> Result<()> {
        self.check()?;
        self.inner.remove(record_id).await
    }
}

/// Classifier that always fails
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingClassifier;

impl ContentClassifier for FailingClassifier {
    fn classify(&self, _content: &str) -> Result<ContentSignals> {
        Err(EideticError::RoutingAmbiguous("classifier offline".to_string()))
    }
}

/// Classifier that returns the same signals for every input
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedClassifier {
    pub signals: ContentSignals,
}

impl FixedClassifier {
    pub fn new(signals: ContentSignals) -> Self {
        Self { signals }
    }
}

impl ContentClassifier for FixedClassifier {
    fn classify(&self, _content: &str) -> Result<ContentSignals> {
        Ok(self.signals)
    }
}
