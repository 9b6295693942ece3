//! Fan-out Executor
//!
//! Runs one operation against many tiers concurrently and reports a
//! per-tier outcome. One tier failing, timing out or panicking never
//! affects the others.
//!
//! Bounds:
//! - at most `min(tiers, max_concurrency)` calls in flight, or an explicit
//!   lower ceiling supplied by the caller
//! - every call has its own timeout
//! - the whole fan-out has a deadline; tasks still running when it passes
//!   are aborted and reported as `DeadlineExceeded`

pub mod lock;

pub use lock::{IdLockGuard, IdLocks};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{EideticError, Result};
use crate::memory::types::{MemoryRecord, TierId, Warning};
use crate::tier::{TierAdapter, TierPayload, TierRecordRef};

/// Fan-out limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Upper bound on concurrent tier calls (default: 8)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Timeout for a single tier call in milliseconds (default: 2000)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Deadline for the whole fan-out in milliseconds (default: 5000)
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Retries per tier after the first attempt (default: 0)
    #[serde(default)]
    pub retries: u32,
    /// First retry delay in milliseconds, doubled per retry (default: 50)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            call_timeout_ms: default_call_timeout_ms(),
            deadline_ms: default_deadline_ms(),
            retries: 0,
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_call_timeout_ms() -> u64 {
    2000
}

fn default_deadline_ms() -> u64 {
    5000
}

fn default_backoff_base_ms() -> u64 {
    50
}

/// Result of one tier's call
#[derive(Debug)]
pub struct TierOutcome<T> {
    pub tier: TierId,
    pub result: Result<T>,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl<T> TierOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The warning to surface for a failed outcome
    pub fn warning(&self) -> Option<Warning> {
        match &self.result {
            Ok(_) => None,
            Err(EideticError::DeadlineExceeded(_)) => {
                Some(Warning::DeadlineExceeded { tier: self.tier })
            }
            Err(e) => Some(Warning::TierUnavailable {
                tier: self.tier,
                reason: failure_reason(e),
            }),
        }
    }
}

/// Short reason string for a tier failure
pub fn failure_reason(error: &EideticError) -> String {
    match error {
        EideticError::TierUnavailable { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

/// Operation run against each tier
pub type TierOp<T> = Arc<dyn Fn(Arc<dyn TierAdapter>) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Operation writing `record` to each tier with that tier's payload
///
/// A tier without a payload entry fails instead of receiving an unshaped write.
pub fn put_op(record: Arc<MemoryRecord>, payloads: Arc<BTreeMap<TierId, TierPayload>>) -> TierOp<TierRecordRef> {
    Arc::new(move |adapter: Arc<dyn TierAdapter>| {
        let record = Arc::clone(&record);
        let payloads = Arc::clone(&payloads);
        async move {
            let tier = adapter.id();
            let payload = payloads.get(&tier).ok_or_else(|| EideticError::TierUnavailable {
                tier,
                reason: "no payload routed to this tier".to_string(),
            })?;
            adapter.put(&record, payload).await
        }
        .boxed()
    })
}

/// Bounded concurrent executor for tier operations
#[derive(Debug, Clone, Default)]
pub struct FanoutExecutor {
    config: FanoutConfig,
}

impl FanoutExecutor {
    pub fn new(config: FanoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// A copy whose deadline and per-call timeout never exceed `limit`
    pub fn capped(&self, limit: Duration) -> Self {
        let limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        let mut config = self.config.clone();
        config.deadline_ms = config.deadline_ms.min(limit_ms);
        config.call_timeout_ms = config.call_timeout_ms.min(limit_ms);
        Self { config }
    }

    /// Run `op` against every adapter, bounded by the configured ceiling
    pub async fn execute<T: Send + 'static>(
        &self,
        adapters: Vec<Arc<dyn TierAdapter>>,
        op: TierOp<T>,
    ) -> Vec<TierOutcome<T>> {
        self.execute_with_ceiling(adapters, None, op).await
    }

    /// Run `op` against every adapter with an optional lower ceiling
    ///
    /// Outcomes are returned in the same order as `adapters`.
    pub async fn execute_with_ceiling<T: Send + 'static>(
        &self,
        adapters: Vec<Arc<dyn TierAdapter>>,
        ceiling: Option<usize>,
        op: TierOp<T>,
    ) -> Vec<TierOutcome<T>> {
        if adapters.is_empty() {
            return Vec::new();
        }

        let mut limit = adapters.len().min(self.config.max_concurrency.max(1));
        if let Some(ceiling) = ceiling {
            limit = limit.min(ceiling.max(1));
        }

        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.deadline_ms);
        let call_timeout = Duration::from_millis(self.config.call_timeout_ms);
        let retries = self.config.retries;
        let backoff_base = Duration::from_millis(self.config.backoff_base_ms);
        let semaphore = Arc::new(Semaphore::new(limit));

        let tiers: Vec<TierId> = adapters.iter().map(|a| a.id()).collect();
        let mut slots: Vec<Option<TierOutcome<T>>> = (0..adapters.len()).map(|_| None).collect();
        let mut set = JoinSet::new();

        for (index, adapter) in adapters.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let op = Arc::clone(&op);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let tier = adapter.id();
                let call_started = Instant::now();
                let mut attempts = 0;

                let result = loop {
                    attempts += 1;
                    let attempt = tokio::time::timeout(call_timeout, op(Arc::clone(&adapter))).await;
                    let result = match attempt {
                        Ok(result) => result,
                        Err(_) => Err(EideticError::TierUnavailable {
                            tier,
                            reason: format!("timed out after {}ms", call_timeout.as_millis()),
                        }),
                    };
                    if result.is_ok() || attempts > retries {
                        break result;
                    }
                    let delay = backoff_base * 2u32.saturating_pow(attempts - 1);
                    tracing::debug!("Retrying {tier} in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                };

                (
                    index,
                    TierOutcome {
                        tier,
                        result,
                        elapsed: call_started.elapsed(),
                        attempts,
                    },
                )
            });
        }

        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((index, outcome)))) => {
                    if let Err(e) = &outcome.result {
                        tracing::warn!("Tier {} failed: {e}", outcome.tier);
                    }
                    slots[index] = Some(outcome);
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("Fan-out task aborted: {e}");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    set.abort_all();
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        slots
            .into_iter()
            .zip(tiers)
            .map(|(slot, tier)| {
                slot.unwrap_or_else(|| {
                    let error = if deadline_hit {
                        tracing::warn!("Tier {tier} missed the fan-out deadline");
                        EideticError::DeadlineExceeded(format!(
                            "tier {tier} did not finish within {}ms",
                            self.config.deadline_ms
                        ))
                    } else {
                        EideticError::TierUnavailable {
                            tier,
                            reason: "task panicked".to_string(),
                        }
                    };
                    TierOutcome {
                        tier,
                        result: Err(error),
                        elapsed,
                        attempts: 0,
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingTier, FlakyTier, SlowTier};

    fn id_search() -> TierOp<TierId> {
        Arc::new(|adapter: Arc<dyn TierAdapter>| {
            async move {
                adapter.search("ping", 0.0, 1).await?;
                Ok::<_, EideticError>(adapter.id())
            }
            .boxed()
        })
    }

    fn slow(tier: TierId, ms: u64) -> Arc<dyn TierAdapter> {
        Arc::new(SlowTier::new(tier, Duration::from_millis(ms)))
    }

    #[test]
    fn test_capped_never_raises_limits() {
        let executor = FanoutExecutor::default();

        let capped = executor.capped(Duration::from_millis(100));
        assert_eq!(capped.config().deadline_ms, 100);
        assert_eq!(capped.config().call_timeout_ms, 100);

        let loose = executor.capped(Duration::from_secs(60));
        assert_eq!(loose.config(), executor.config());
    }

    #[tokio::test]
    async fn test_empty_fanout() {
        let executor = FanoutExecutor::default();
        assert!(executor.execute(Vec::new(), id_search()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_keep_input_order() {
        let executor = FanoutExecutor::default();
        let adapters = vec![
            slow(TierId::Semantic, 300),
            slow(TierId::Working, 10),
            Arc::new(FailingTier::new(TierId::Priority)) as Arc<dyn TierAdapter>,
        ];

        let outcomes = executor.execute(adapters, id_search()).await;
        let tiers: Vec<TierId> = outcomes.iter().map(|o| o.tier).collect();
        assert_eq!(tiers, vec![TierId::Semantic, TierId::Working, TierId::Priority]);
        assert!(outcomes[0].is_success());
        assert!(outcomes[1].is_success());
        assert!(!outcomes[2].is_success());
        assert!(matches!(
            outcomes[2].warning(),
            Some(Warning::TierUnavailable { tier: TierId::Priority, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_marks_tier_failed() {
        let executor = FanoutExecutor::new(FanoutConfig {
            call_timeout_ms: 100,
            ..Default::default()
        });
        let outcomes = executor
            .execute(vec![slow(TierId::Working, 500), slow(TierId::Semantic, 10)], id_search())
            .await;

        match &outcomes[0].result {
            Err(EideticError::TierUnavailable { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(outcomes[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_in_flight() {
        let executor = FanoutExecutor::new(FanoutConfig {
            call_timeout_ms: 10_000,
            deadline_ms: 200,
            ..Default::default()
        });
        let start = Instant::now();
        let outcomes = executor
            .execute(vec![slow(TierId::Working, 50), slow(TierId::Semantic, 5_000)], id_search())
            .await;

        assert!(start.elapsed() < Duration::from_millis(300));
        assert!(outcomes[0].is_success());
        assert!(matches!(outcomes[1].result, Err(EideticError::DeadlineExceeded(_))));
        assert_eq!(
            outcomes[1].warning(),
            Some(Warning::DeadlineExceeded { tier: TierId::Semantic })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_backoff() {
        let executor = FanoutExecutor::new(FanoutConfig {
            retries: 2,
            backoff_base_ms: 10,
            ..Default::default()
        });
        let flaky = Arc::new(FlakyTier::new(TierId::Working, 2));
        let outcomes = executor
            .execute(vec![flaky.clone() as Arc<dyn TierAdapter>], id_search())
            .await;

        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].attempts, 3);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retries_by_default() {
        let executor = FanoutExecutor::default();
        let flaky = Arc::new(FlakyTier::new(TierId::Working, 1));
        let outcomes = executor
            .execute(vec![flaky.clone() as Arc<dyn TierAdapter>], id_search())
            .await;

        assert!(!outcomes[0].is_success());
        assert_eq!(outcomes[0].attempts, 1);
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_ceiling_runs_sequentially() {
        let executor = FanoutExecutor::default();
        let start = Instant::now();
        let adapters = vec![slow(TierId::Working, 100), slow(TierId::Semantic, 100)];
        executor.execute_with_ceiling(adapters, Some(1), id_search()).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
    }
}
