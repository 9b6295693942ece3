//! The cache facade
//!
//! [`EideticCache`] wires the record store, tier registry, routing engine,
//! fan-out executor, synthesis engine and consolidator together and exposes
//! the public operations: store, recall, get, run_cycle and stats.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::consolidation::{
    ConsolidationDeps, Consolidator, CycleOutcome, CycleStatus, CycleType,
};
use crate::error::{EideticError, Result};
use crate::fanout::{FanoutExecutor, IdLocks, TierOp, TierOutcome, put_op};
use crate::memory::types::{MemoryRecord, StoreContext, TierId, Warning};
use crate::memory::weight::{WeightCategory, WeightInputs, initial_weight, reinforce};
use crate::memory::AccessTracker;
use crate::router::{ContentClassifier, KeywordClassifier, RoutingDecision, RoutingEngine, RoutingStats, RoutingStrategy};
use crate::storage::{RecordFilter, RecordStore};
use crate::synthesis::{RankedResult, SynthesisEngine};
use crate::tier::{TierAdapter, TierHealthSnapshot, TierHit, TierPayload, TierRegistry};

/// Outcome of a successful store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub id: Uuid,
    pub weight: f32,
    /// Tiers that accepted the record
    pub tiers: Vec<TierId>,
    pub strategy: RoutingStrategy,
    /// Set when routing fell back to writing every tier
    pub fallback: bool,
    pub warnings: Vec<Warning>,
}

/// A recall query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallRequest {
    pub query: String,
    /// Weight floor; configured default when absent
    #[serde(default)]
    pub min_weight: Option<f32>,
    /// Restrict the search to these tiers
    #[serde(default)]
    pub tier_filter: Option<Vec<TierId>>,
    /// Result count; configured default when absent, capped
    #[serde(default)]
    pub max_results: Option<usize>,
}

impl RecallRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_min_weight(mut self, min_weight: f32) -> Self {
        self.min_weight = Some(min_weight);
        self
    }

    pub fn with_tiers(mut self, tiers: Vec<TierId>) -> Self {
        self.tier_filter = Some(tiers);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }
}

/// Ranked recall results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallResponse {
    pub results: Vec<RankedResult>,
    /// Records confirmed by more than one tier
    pub cross_tier: Vec<Uuid>,
    pub warnings: Vec<Warning>,
}

/// Point-in-time statistics for the whole cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub records: usize,
    /// Record count per weight band; every band is present
    pub bands: BTreeMap<WeightCategory, usize>,
    /// Record count per tier assignment
    pub tier_counts: BTreeMap<TierId, usize>,
    pub tiers: BTreeMap<TierId, TierHealthSnapshot>,
    pub cycles: BTreeMap<CycleType, CycleStatus>,
    pub routing: RoutingStats,
    /// Co-access pairs waiting for the next slow cycle
    pub pending_pairs: usize,
    pub generated_at: DateTime<Utc>,
}

/// Weight-tiered memory cache
pub struct EideticCache {
    config: Config,
    store: Arc<RecordStore>,
    tiers: TierRegistry,
    router: Arc<RoutingEngine>,
    fanout: FanoutExecutor,
    synthesis: SynthesisEngine,
    tracker: Arc<AccessTracker>,
    consolidator: Consolidator,
    snapshot_path: Option<PathBuf>,
}

impl std::fmt::Debug for EideticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EideticCache")
            .field("records", &self.store.len())
            .field("tiers", &self.tiers)
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

impl EideticCache {
    /// Create an empty cache over the given tiers
    pub fn new(config: Config, tiers: TierRegistry) -> Result<Self> {
        Self::with_parts(config, tiers, Arc::new(KeywordClassifier::default()), RecordStore::new())
    }

    /// Create an empty cache backed by the in-process tiers
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::new(config, TierRegistry::in_memory())
    }

    /// Create a cache from explicit components
    pub fn with_parts(
        config: Config,
        tiers: TierRegistry,
        classifier: Arc<dyn ContentClassifier>,
        store: RecordStore,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(store);
        let router = Arc::new(RoutingEngine::new(config.routing.clone(), classifier));
        let fanout = FanoutExecutor::new(config.fanout.clone());
        let synthesis = SynthesisEngine::new(config.synthesis.clone(), store.clone());
        let tracker = Arc::new(AccessTracker::new(config.recall.tracker_capacity));

        let consolidator = Consolidator::new(
            config.consolidation.clone(),
            ConsolidationDeps {
                store: store.clone(),
                tiers: tiers.clone(),
                router: router.clone(),
                fanout: fanout.clone(),
                synthesis: synthesis.clone(),
                tracker: tracker.clone(),
                locks: IdLocks::default(),
                weight: config.weight,
            },
        );

        Ok(Self {
            config,
            store,
            tiers,
            router,
            fanout,
            synthesis,
            tracker,
            consolidator,
            snapshot_path: None,
        })
    }

    /// Open the snapshot in the configured data directory and rehydrate the tiers
    ///
    /// A missing snapshot yields an empty cache. Later snapshots are written
    /// back to the same path.
    pub async fn open(config: Config, tiers: TierRegistry) -> Result<Self> {
        let path = config.storage.snapshot_path();
        Self::open_at(config, tiers, &path).await
    }

    /// Like [`EideticCache::open`], with an explicit snapshot path
    pub async fn open_at(config: Config, tiers: TierRegistry, path: &Path) -> Result<Self> {
        let store = RecordStore::load(path)?;
        tracing::info!("Loaded {} records from {}", store.len(), path.display());

        let mut cache = Self::with_parts(config, tiers, Arc::new(KeywordClassifier::default()), store)?;
        cache.snapshot_path = Some(path.to_path_buf());
        cache.rehydrate().await;
        Ok(cache)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tiers(&self) -> &TierRegistry {
        &self.tiers
    }

    pub fn router(&self) -> &RoutingEngine {
        &self.router
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Store new content
    ///
    /// Routes the content, computes its initial weight and writes it to
    /// every registered target tier. Succeeds when at least one tier
    /// accepted the record; the rest are reported as warnings.
    pub async fn store(
        &self,
        content: &str,
        content_type: &str,
        context: StoreContext,
    ) -> Result<StoreReceipt> {
        if content.trim().is_empty() {
            return Err(EideticError::InvalidInput("content must not be empty".to_string()));
        }
        validate_context(&context)?;

        let decision = self.router.decide(content, content_type, &context);
        let signals = decision.signals.unwrap_or_default();
        let emotional = signals.emotional_weight(self.config.routing.emotional_saturation);
        let importance = context.importance.or(context.priority).unwrap_or(0.5);

        let weight = initial_weight(
            &WeightInputs {
                importance,
                emotional_weight: emotional,
                content_length: content.chars().count(),
                urgent: context.is_urgent(),
            },
            &self.config.weight,
        );

        let record = MemoryRecord::new(
            content.to_string(),
            content_type,
            weight,
            importance,
            emotional,
            context,
        );
        let id = record.id;

        let (outcomes, mut warnings) = self.write_to_tiers(&record, &decision).await;
        if !outcomes.iter().any(TierOutcome::is_success) {
            let mut failed: Vec<(TierId, String)> = outcomes
                .iter()
                .filter_map(|o| {
                    o.result
                        .as_ref()
                        .err()
                        .map(|e| (o.tier, crate::fanout::failure_reason(e)))
                })
                .collect();
            failed.extend(unregistered(&warnings));
            tracing::warn!("Store of {id} rejected by every tier");
            return Err(EideticError::AllTiersFailed(failed));
        }

        self.store.insert(record)?;
        let summary = self.synthesis.apply_write(id, &outcomes)?;
        warnings.extend(summary.warnings);

        tracing::debug!(
            "Stored {id} (weight {weight:.3}) in {:?} via {:?}",
            summary.tiers,
            decision.strategy
        );

        Ok(StoreReceipt {
            id,
            weight,
            tiers: summary.tiers,
            strategy: decision.strategy,
            fallback: decision.fallback,
            warnings,
        })
    }

    async fn write_to_tiers(
        &self,
        record: &MemoryRecord,
        decision: &RoutingDecision,
    ) -> (Vec<TierOutcome<crate::tier::TierRecordRef>>, Vec<Warning>) {
        let mut warnings = Vec::new();
        let mut adapters: Vec<Arc<dyn TierAdapter>> = Vec::new();
        let mut payloads = BTreeMap::new();

        for tier in &decision.target_tiers {
            let Some(adapter) = self.tiers.get(*tier) else {
                tracing::debug!("Skipping unregistered tier {tier}");
                warnings.push(Warning::TierUnavailable {
                    tier: *tier,
                    reason: NOT_REGISTERED.to_string(),
                });
                continue;
            };
            let transformation = decision.transformations.get(tier).cloned().unwrap_or_else(|| {
                self.router.transformation(
                    *tier,
                    &record.content,
                    &record.context,
                    record.emotional_weight > 0.0,
                )
            });
            payloads.insert(
                *tier,
                TierPayload {
                    weight: record.weight,
                    transformation,
                },
            );
            adapters.push(adapter);
        }

        if adapters.is_empty() {
            return (Vec::new(), warnings);
        }

        let ceiling = match decision.strategy {
            RoutingStrategy::Selective => Some(1),
            RoutingStrategy::ParallelAll => None,
        };
        let outcomes = self
            .fanout
            .execute_with_ceiling(
                adapters,
                ceiling,
                put_op(Arc::new(record.clone()), Arc::new(payloads)),
            )
            .await;
        self.record_health(&outcomes);

        (outcomes, warnings)
    }

    /// Search the tiers and return merged, ranked results
    ///
    /// Every returned record is reinforced and its access recorded. Records
    /// confirmed by two or more tiers are associated with each other.
    pub async fn recall(&self, request: RecallRequest) -> Result<RecallResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(EideticError::InvalidInput("query must not be empty".to_string()));
        }

        let min_weight = request.min_weight.unwrap_or(self.config.recall.min_weight);
        if !min_weight.is_finite() || !(0.0..=1.0).contains(&min_weight) {
            return Err(EideticError::InvalidInput(format!(
                "min_weight must be within [0, 1], got {min_weight}"
            )));
        }
        let limit = request
            .max_results
            .unwrap_or(self.config.recall.max_results)
            .clamp(1, self.config.recall.max_results_cap);

        let requested = request.tier_filter.unwrap_or_else(|| self.tiers.ids());
        let mut warnings = Vec::new();
        let mut adapters = Vec::new();
        for tier in requested {
            match self.tiers.get(tier) {
                Some(adapter) => adapters.push(adapter),
                None => warnings.push(Warning::TierUnavailable {
                    tier,
                    reason: NOT_REGISTERED.to_string(),
                }),
            }
        }
        if adapters.is_empty() {
            tracing::warn!("Recall requested only unregistered tiers");
            return Err(EideticError::AllTiersFailed(unregistered(&warnings)));
        }

        let outcomes = self
            .fanout
            .execute(adapters, search_op(query, min_weight, limit))
            .await;
        self.record_health(&outcomes);

        let mut merged = self.synthesis.merge_hits(outcomes, min_weight, limit)?;
        warnings.append(&mut merged.warnings);

        let now = Utc::now();
        let ids: Vec<Uuid> = merged.results.iter().map(|r| r.id).collect();
        let mut reinforced = Vec::with_capacity(merged.results.len());
        for result in &mut merged.results {
            let boost = self.config.weight.boost_factor;
            let weight_config = self.config.weight;
            let updated = self.store.update(result.id, |record| {
                record.weight = reinforce(record.weight, boost, &weight_config);
                record.mark_accessed_at(now);
                record.clone()
            });
            if let Ok(record) = updated {
                result.weight = record.weight;
                result.last_accessed_at = record.last_accessed_at;
                reinforced.push(record);
            }
        }
        self.reinforce_tiers(&reinforced).await;

        self.tracker.record_recall(&ids, now);
        let associated = self.synthesis.strengthen_group(&merged.cross_tier);
        if associated > 0 {
            tracing::debug!("Strengthened {associated} cross-tier associations");
        }

        Ok(RecallResponse {
            results: merged.results,
            cross_tier: merged.cross_tier,
            warnings,
        })
    }

    /// Push reinforced weights to every tier holding the records
    ///
    /// Tiers that were filtered out of the recall get the new weight too, so
    /// their `min_weight` floor sees the same value as the record store.
    /// Failures are logged only.
    async fn reinforce_tiers(&self, records: &[MemoryRecord]) {
        let syncs = records.iter().map(|record| self.tiers.sync_weight(record, true));
        for (tier, reason) in futures::future::join_all(syncs).await.into_iter().flatten() {
            tracing::warn!("Tier {tier} failed to reinforce: {reason}");
        }
    }

    fn record_health<T>(&self, outcomes: &[TierOutcome<T>]) {
        for outcome in outcomes {
            match &outcome.result {
                Ok(_) => self.tiers.record_success(outcome.tier),
                Err(e) => self.tiers.record_failure(outcome.tier, &e.to_string()),
            }
        }
    }

    /// Look up a record regardless of weight, without reinforcing it
    pub fn get(&self, id: Uuid) -> Option<MemoryRecord> {
        self.store.get(id)
    }

    /// Records matching `filter`, heaviest first
    pub fn list(&self, filter: &RecordFilter, limit: usize, offset: usize) -> Vec<MemoryRecord> {
        self.store.list_filtered(filter, limit, offset)
    }

    pub fn count(&self, filter: &RecordFilter) -> usize {
        self.store.count_filtered(filter)
    }

    /// Run a consolidation cycle unless it is not due
    pub async fn run_cycle(&self, cycle: CycleType, force: bool) -> CycleOutcome {
        self.run_cycle_at(cycle, force, Utc::now()).await
    }

    /// Run a consolidation cycle as if the current time were `now`
    pub async fn run_cycle_at(
        &self,
        cycle: CycleType,
        force: bool,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        let outcome = self.consolidator.run_cycle_at(cycle, force, now).await;
        if matches!(outcome, CycleOutcome::Completed(_)) && self.config.storage.snapshot_after_cycle {
            if let Err(e) = self.save_snapshot() {
                tracing::error!("Failed to write snapshot after {cycle} cycle: {e}");
            }
        }
        outcome
    }

    /// Statistics for every component
    pub fn stats(&self) -> CacheStats {
        let mut tier_counts: BTreeMap<TierId, usize> =
            TierId::ALL.iter().map(|tier| (*tier, 0)).collect();
        for tier in TierId::ALL {
            let filter = RecordFilter::new().with_tier(tier);
            tier_counts.insert(tier, self.store.count_filtered(&filter));
        }

        CacheStats {
            records: self.store.len(),
            bands: self.store.band_counts(&self.config.bands),
            tier_counts,
            tiers: self.tiers.health(),
            cycles: self.consolidator.status(),
            routing: self.router.stats(),
            pending_pairs: self.tracker.pair_count(),
            generated_at: Utc::now(),
        }
    }

    /// Write the record snapshot, if this cache has a snapshot path
    pub fn save_snapshot(&self) -> Result<()> {
        match &self.snapshot_path {
            Some(path) => {
                self.store.save(path)?;
                tracing::debug!("Wrote {} records to {}", self.store.len(), path.display());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Re-put every record into the tiers it is assigned to
    ///
    /// Returns how many tier writes succeeded. Failures are logged and the
    /// assignment is kept, so the next consolidation still sees the record
    /// where it belongs.
    pub async fn rehydrate(&self) -> usize {
        let mut written = 0;
        for id in self.store.ids_sorted() {
            let Some(record) = self.store.get(id) else {
                continue;
            };
            let mut adapters = Vec::new();
            let mut payloads = BTreeMap::new();
            for tier in &record.tier_assignments {
                let Some(adapter) = self.tiers.get(*tier) else {
                    continue;
                };
                let transformation = self.router.transformation(
                    *tier,
                    &record.content,
                    &record.context,
                    record.emotional_weight > 0.0,
                );
                payloads.insert(
                    *tier,
                    TierPayload {
                        weight: record.weight,
                        transformation,
                    },
                );
                adapters.push(adapter);
            }
            if adapters.is_empty() {
                continue;
            }

            let outcomes = self
                .fanout
                .execute(adapters, put_op(Arc::new(record), Arc::new(payloads)))
                .await;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(_) => written += 1,
                    Err(e) => tracing::warn!("Rehydrating {id} into {} failed: {e}", outcome.tier),
                }
            }
        }
        if written > 0 {
            tracing::info!("Rehydrated {written} tier entries");
        }
        written
    }

    /// Spawn one background task per cycle type
    ///
    /// Each task wakes once per cycle interval and runs the cycle if it is
    /// due. Tasks exit when `shutdown` flips to true or its sender drops.
    pub fn spawn_consolidation(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        if !self.config.consolidation.enabled {
            tracing::info!("Background consolidation disabled");
            return Vec::new();
        }

        CycleType::ALL
            .iter()
            .map(|cycle| {
                let cycle = *cycle;
                let cache = Arc::clone(self);
                let mut shutdown = shutdown.clone();
                let mins = match cycle {
                    CycleType::Fast => cache.config.consolidation.fast_interval_mins,
                    CycleType::Slow => cache.config.consolidation.slow_interval_mins,
                };
                let period = Duration::from_secs(mins.max(1) * 60);

                tokio::spawn(async move {
                    let mut ticker =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    tracing::info!("Scheduled {cycle} consolidation every {mins} minutes");

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                cache.run_cycle(cycle, false).await;
                            }
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    tracing::debug!("{cycle} consolidation task stopped");
                })
            })
            .collect()
    }
}

const NOT_REGISTERED: &str = "tier not registered";

fn unregistered(warnings: &[Warning]) -> Vec<(TierId, String)> {
    warnings
        .iter()
        .filter_map(|w| match w {
            Warning::TierUnavailable { tier, reason } => Some((*tier, reason.clone())),
            _ => None,
        })
        .collect()
}

fn validate_context(context: &StoreContext) -> Result<()> {
    let fields = [
        ("priority", context.priority),
        ("importance", context.importance),
        ("amplification", context.amplification),
    ];
    for (name, value) in fields {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(EideticError::InvalidInput(format!(
                    "{name} must be a non-negative number, got {v}"
                )));
            }
        }
    }
    Ok(())
}

fn search_op(query: &str, min_weight: f32, limit: usize) -> TierOp<Vec<TierHit>> {
    let query: Arc<str> = Arc::from(query);
    Arc::new(move |adapter: Arc<dyn TierAdapter>| {
        let query = query.clone();
        async move { adapter.search(&query, min_weight, limit).await }.boxed()
    })
}
