//! Consolidation Scheduler
//!
//! Background cycles that rebalance the cache:
//! - fast cycle: decay, promote hot working records into long-term tiers,
//!   demote cold or excess records out of the working tier
//! - slow cycle: decay, then strengthen associations between records that
//!   were recalled together
//!
//! Records are processed in id order, in batches that each run under a
//! timeout. A batch that times out is skipped and the run moves on, so a
//! slow tier costs at most that batch. Progress is checkpointed after every
//! batch; a run cancelled part way resumes after the last checkpoint. Every
//! record update commits on its own, and decay is measured from the later of
//! last access and last decay, so re-running a cycle is safe.
//!
//! Both cycles also sweep expired routing decisions out of the decision cache.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EideticError, Result};
use crate::fanout::{FanoutExecutor, IdLocks, put_op};
use crate::memory::types::TierId;
use crate::memory::weight::{WeightConfig, decay};
use crate::memory::AccessTracker;
use crate::router::RoutingEngine;
use crate::storage::{RecordFilter, RecordStore};
use crate::synthesis::SynthesisEngine;
use crate::tier::{TierPayload, TierRegistry};

/// Cycle periods, thresholds and batching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Run cycles in the background (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minutes between fast cycles (default: 90)
    #[serde(default = "default_fast_interval_mins")]
    pub fast_interval_mins: u64,
    /// Minutes between slow cycles (default: 360)
    #[serde(default = "default_slow_interval_mins")]
    pub slow_interval_mins: u64,
    /// Records accessed more recently than this are not decayed (default: 1.0)
    #[serde(default = "default_decay_after_hours")]
    pub decay_after_hours: f64,
    /// Working records at or above this weight are promoted (default: 0.7)
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f32,
    /// Working records below this weight are demoted (default: 0.2)
    #[serde(default = "default_demotion_threshold")]
    pub demotion_threshold: f32,
    /// Maximum records kept in the working tier (default: 1024)
    #[serde(default = "default_working_capacity")]
    pub working_capacity: usize,
    /// Co-recalls needed before two records are associated (default: 2)
    #[serde(default = "default_min_co_access")]
    pub min_co_access: u32,
    /// Records per batch (default: 256)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Time allowed per batch in milliseconds (default: 5000)
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            fast_interval_mins: default_fast_interval_mins(),
            slow_interval_mins: default_slow_interval_mins(),
            decay_after_hours: default_decay_after_hours(),
            promotion_threshold: default_promotion_threshold(),
            demotion_threshold: default_demotion_threshold(),
            working_capacity: default_working_capacity(),
            min_co_access: default_min_co_access(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_fast_interval_mins() -> u64 {
    90
}

fn default_slow_interval_mins() -> u64 {
    360
}

fn default_decay_after_hours() -> f64 {
    1.0
}

fn default_promotion_threshold() -> f32 {
    0.7
}

fn default_demotion_threshold() -> f32 {
    0.2
}

fn default_working_capacity() -> usize {
    1024
}

fn default_min_co_access() -> u32 {
    2
}

fn default_batch_size() -> usize {
    256
}

fn default_batch_timeout_ms() -> u64 {
    5000
}

impl ConsolidationConfig {
    pub fn interval(&self, cycle: CycleType) -> chrono::Duration {
        let mins = match cycle {
            CycleType::Fast => self.fast_interval_mins,
            CycleType::Slow => self.slow_interval_mins,
        };
        chrono::Duration::minutes(mins.min(i64::MAX as u64) as i64)
    }
}

/// The two consolidation cadences
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleType {
    Fast,
    Slow,
}

impl CycleType {
    pub const ALL: [CycleType; 2] = [CycleType::Fast, CycleType::Slow];

    pub fn as_str(self) -> &'static str {
        match self {
            CycleType::Fast => "fast",
            CycleType::Slow => "slow",
        }
    }

    fn index(self) -> usize {
        match self {
            CycleType::Fast => 0,
            CycleType::Slow => 1,
        }
    }
}

impl fmt::Display for CycleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleType {
    type Err = EideticError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" | "light" => Ok(CycleType::Fast),
            "slow" | "deep" => Ok(CycleType::Slow),
            other => Err(EideticError::InvalidInput(format!("Unknown cycle type: {other}"))),
        }
    }
}

/// What one cycle run did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: CycleType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Id the run resumed after, when continuing an interrupted run
    pub resumed_after: Option<Uuid>,
    pub examined: usize,
    pub decayed: usize,
    /// Sum of weight lost to decay
    pub total_decay: f64,
    /// Largest single-record weight loss
    pub max_decay: f32,
    pub promoted: usize,
    pub demoted: usize,
    pub associations: usize,
    /// Records touched by recalls since the previous slow cycle
    pub touched: usize,
    pub batches: usize,
    /// Batches skipped after hitting the batch timeout; their ids are in `errors`
    pub timed_out_batches: usize,
    /// Expired routing decisions swept from the decision cache
    pub evicted_decisions: usize,
    /// False when any batch was skipped
    pub complete: bool,
    pub errors: Vec<String>,
}

impl CycleReport {
    fn new(cycle: CycleType, now: DateTime<Utc>, resumed_after: Option<Uuid>) -> Self {
        Self {
            cycle,
            started_at: now,
            finished_at: now,
            resumed_after,
            examined: 0,
            decayed: 0,
            total_decay: 0.0,
            max_decay: 0.0,
            promoted: 0,
            demoted: 0,
            associations: 0,
            touched: 0,
            batches: 0,
            timed_out_batches: 0,
            evicted_decisions: 0,
            complete: false,
            errors: Vec::new(),
        }
    }

    fn absorb(&mut self, batch: BatchStats) {
        self.examined += batch.examined;
        self.decayed += batch.decayed;
        self.total_decay += batch.total_decay;
        self.max_decay = self.max_decay.max(batch.max_decay);
        self.promoted += batch.promoted;
        self.demoted += batch.demoted;
        self.errors.extend(batch.errors);
        self.batches += 1;
    }
}

/// Result of asking for a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The cycle ran recently; nothing was done
    NotDue { next_due: DateTime<Utc> },
    Completed(CycleReport),
}

/// Scheduling state of one cycle type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStatus {
    pub last_completed_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub interval_mins: u64,
    /// Set while a cancelled run waits to resume
    pub resume_after: Option<Uuid>,
    pub runs: u64,
    pub last_report: Option<CycleReport>,
}

#[derive(Debug, Default)]
struct CycleState {
    last_completed_at: Option<DateTime<Utc>>,
    cursor: Option<Uuid>,
    runs: u64,
    last_report: Option<CycleReport>,
}

#[derive(Debug, Default)]
struct BatchStats {
    examined: usize,
    decayed: usize,
    total_decay: f64,
    max_decay: f32,
    promoted: usize,
    demoted: usize,
    errors: Vec<String>,
}

/// Components consolidation works against
#[derive(Clone)]
pub struct ConsolidationDeps {
    pub store: Arc<RecordStore>,
    pub tiers: TierRegistry,
    pub router: Arc<RoutingEngine>,
    pub fanout: FanoutExecutor,
    pub synthesis: SynthesisEngine,
    pub tracker: Arc<AccessTracker>,
    pub locks: IdLocks,
    pub weight: WeightConfig,
}

/// Runs fast and slow cycles and remembers when each last ran
pub struct Consolidator {
    config: ConsolidationConfig,
    deps: ConsolidationDeps,
    state: Mutex<[CycleState; 2]>,
    run_locks: [tokio::sync::Mutex<()>; 2],
}

impl fmt::Debug for Consolidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consolidator")
            .field("config", &self.config)
            .finish()
    }
}

impl Consolidator {
    /// Promotion fan-outs are capped at the batch timeout
    pub fn new(config: ConsolidationConfig, mut deps: ConsolidationDeps) -> Self {
        deps.fanout = deps.fanout.capped(Duration::from_millis(config.batch_timeout_ms));
        Self {
            config,
            deps,
            state: Mutex::new(Default::default()),
            run_locks: [tokio::sync::Mutex::new(()), tokio::sync::Mutex::new(())],
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut [CycleState; 2]) -> R) -> R {
        match self.state.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Scheduling state for both cycle types
    pub fn status(&self) -> BTreeMap<CycleType, CycleStatus> {
        self.with_state(|state| {
            CycleType::ALL
                .iter()
                .map(|cycle| {
                    let s = &state[cycle.index()];
                    let interval = self.config.interval(*cycle);
                    (
                        *cycle,
                        CycleStatus {
                            last_completed_at: s.last_completed_at,
                            next_due_at: s.last_completed_at.map(|at| at + interval),
                            interval_mins: interval.num_minutes().max(0) as u64,
                            resume_after: s.cursor,
                            runs: s.runs,
                            last_report: s.last_report.clone(),
                        },
                    )
                })
                .collect()
        })
    }

    /// Run a cycle now unless it is not due
    pub async fn run_cycle(&self, cycle: CycleType, force: bool) -> CycleOutcome {
        self.run_cycle_at(cycle, force, Utc::now()).await
    }

    /// Run a cycle as if the current time were `now`
    pub async fn run_cycle_at(&self, cycle: CycleType, force: bool, now: DateTime<Utc>) -> CycleOutcome {
        let _running = self.run_locks[cycle.index()].lock().await;

        let (last_completed, cursor, last_slow) = self.with_state(|state| {
            let s = &state[cycle.index()];
            (
                s.last_completed_at,
                s.cursor,
                state[CycleType::Slow.index()].last_completed_at,
            )
        });

        if !force && cursor.is_none() {
            if let Some(last) = last_completed {
                let next_due = last + self.config.interval(cycle);
                if now < next_due {
                    tracing::debug!("{cycle} cycle not due until {next_due}");
                    return CycleOutcome::NotDue { next_due };
                }
            }
        }

        tracing::info!("Starting {cycle} consolidation cycle");
        let mut report = CycleReport::new(cycle, now, cursor);

        let ids: Vec<Uuid> = self
            .deps
            .store
            .ids_sorted()
            .into_iter()
            .filter(|id| cursor.is_none_or(|after| *id > after))
            .collect();

        let batch_size = self.config.batch_size.max(1);
        let batch_timeout = Duration::from_millis(self.config.batch_timeout_ms);

        for batch in ids.chunks(batch_size) {
            match tokio::time::timeout(batch_timeout, self.process_batch(cycle, batch, now)).await {
                Ok(stats) => report.absorb(stats),
                Err(_) => {
                    report.timed_out_batches += 1;
                    let lost: Vec<String> = batch.iter().map(Uuid::to_string).collect();
                    report.errors.push(format!(
                        "batch timed out after {}ms, skipped: {}",
                        self.config.batch_timeout_ms,
                        lost.join(", ")
                    ));
                    tracing::warn!(
                        "{cycle} cycle batch of {} records timed out; continuing with the next batch",
                        batch.len()
                    );
                }
            }

            // Checkpoint past this batch so a cancelled run resumes after it.
            let checkpoint = batch.last().copied();
            self.with_state(|state| state[cycle.index()].cursor = checkpoint);
        }

        if cycle == CycleType::Fast {
            report.demoted += self.demote_over_capacity(&mut report.errors).await;
        }
        if cycle == CycleType::Slow {
            let since = last_slow.unwrap_or(DateTime::<Utc>::MIN_UTC);
            report.touched = self.deps.tracker.touched_since(since).len();
            let pairs: Vec<(Uuid, Uuid)> = self
                .deps
                .tracker
                .drain_co_accessed(self.config.min_co_access)
                .into_iter()
                .map(|(pair, _)| pair)
                .collect();
            report.associations = self.deps.synthesis.apply_associations(&pairs);
        }
        report.evicted_decisions = self.deps.router.cache().evict_expired();
        report.complete = report.timed_out_batches == 0;

        report.finished_at = Utc::now().max(now);

        self.with_state(|state| {
            let s = &mut state[cycle.index()];
            s.runs += 1;
            s.cursor = None;
            s.last_completed_at = Some(now);
            s.last_report = Some(report.clone());
        });

        tracing::info!(
            "{cycle} cycle finished: examined={} decayed={} promoted={} demoted={} associations={} complete={}",
            report.examined,
            report.decayed,
            report.promoted,
            report.demoted,
            report.associations,
            report.complete
        );
        for error in &report.errors {
            tracing::error!("{cycle} cycle error: {error}");
        }

        CycleOutcome::Completed(report)
    }

    async fn process_batch(&self, cycle: CycleType, ids: &[Uuid], now: DateTime<Utc>) -> BatchStats {
        let mut stats = BatchStats::default();

        for id in ids {
            stats.examined += 1;

            if let Some(delta) = self.decay_record(*id, now) {
                stats.decayed += 1;
                stats.total_decay += delta as f64;
                stats.max_decay = stats.max_decay.max(delta);

                if let Some(record) = self.deps.store.get(*id) {
                    for (tier, reason) in self.deps.tiers.sync_weight(&record, false).await {
                        stats.errors.push(format!("weight sync of {id} to {tier} failed: {reason}"));
                    }
                }
            }

            if cycle != CycleType::Fast {
                continue;
            }

            let Some(record) = self.deps.store.get(*id) else {
                continue;
            };
            let in_working = record.tier_assignments.contains(&TierId::Working);

            if in_working
                && record.weight >= self.config.promotion_threshold
                && !record.in_long_term_tier()
            {
                match self.promote(*id).await {
                    Ok(tiers) if !tiers.is_empty() => {
                        tracing::debug!("Promoted {id} to {tiers:?}");
                        stats.promoted += 1;
                    }
                    Ok(_) => {}
                    Err(e) => stats.errors.push(format!("promotion of {id} failed: {e}")),
                }
            } else if in_working && record.weight < self.config.demotion_threshold {
                match self.demote(*id).await {
                    Ok(true) => stats.demoted += 1,
                    Ok(false) => {}
                    Err(e) => stats.errors.push(format!("demotion of {id} failed: {e}")),
                }
            }
        }

        stats
    }

    /// Apply decay to one record; returns the weight lost, if any
    fn decay_record(&self, id: Uuid, now: DateTime<Utc>) -> Option<f32> {
        let decay_after_hours = self.config.decay_after_hours;
        let weight_config = self.deps.weight;

        self.deps
            .store
            .update(id, |record| {
                let idle_hours = hours_between(record.last_accessed_at, now);
                if idle_hours <= decay_after_hours {
                    return None;
                }
                let elapsed = hours_between(record.decay_anchor(), now);
                if elapsed <= 0.0 {
                    return None;
                }

                let before = record.weight;
                record.weight = decay(
                    before,
                    elapsed,
                    weight_config.decay_rate_per_day,
                    &weight_config,
                );
                record.last_decayed_at = Some(now);
                Some((before - record.weight).max(0.0))
            })
            .ok()
            .flatten()
    }

    /// Route a working record into long-term tiers
    async fn promote(&self, id: Uuid) -> Result<Vec<TierId>> {
        let _guard = self.deps.locks.lock(id).await;
        let record = self.deps.store.get(id).ok_or(EideticError::NotFound(id))?;
        if record.in_long_term_tier() {
            return Ok(Vec::new());
        }

        let decision = self
            .deps
            .router
            .decide(&record.content, &record.content_type, &record.context);
        let mut targets = decision.long_term_targets();
        if targets.is_empty() {
            targets.push(TierId::Semantic);
        }

        let adapters: Vec<_> = targets
            .iter()
            .filter_map(|tier| self.deps.tiers.get(*tier))
            .collect();
        if adapters.is_empty() {
            return Err(EideticError::AllTiersFailed(
                targets
                    .iter()
                    .map(|t| (*t, "tier not registered".to_string()))
                    .collect(),
            ));
        }

        let payloads: BTreeMap<TierId, TierPayload> = targets
            .iter()
            .map(|tier| {
                let transformation = decision.transformations.get(tier).cloned().unwrap_or_else(|| {
                    self.deps
                        .router
                        .transformation(*tier, &record.content, &record.context, false)
                });
                (
                    *tier,
                    TierPayload {
                        weight: record.weight,
                        transformation,
                    },
                )
            })
            .collect();

        let outcomes = self
            .deps
            .fanout
            .execute(adapters, put_op(Arc::new(record), Arc::new(payloads)))
            .await;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(_) => self.deps.tiers.record_success(outcome.tier),
                Err(e) => self.deps.tiers.record_failure(outcome.tier, &e.to_string()),
            }
        }

        let summary = self.deps.synthesis.apply_write(id, &outcomes)?;
        Ok(summary.tiers)
    }

    /// Logically remove a record from the working tier
    async fn demote(&self, id: Uuid) -> Result<bool> {
        let _guard = self.deps.locks.lock(id).await;
        let Some(working) = self.deps.tiers.get(TierId::Working) else {
            return Ok(false);
        };

        if let Err(e) = working.remove(id).await {
            self.deps.tiers.record_failure(TierId::Working, &e.to_string());
            return Err(e);
        }
        self.deps.tiers.record_success(TierId::Working);

        self.deps
            .store
            .update(id, |record| record.tier_assignments.remove(&TierId::Working))
    }

    /// Demote the lowest-weight working records beyond capacity
    async fn demote_over_capacity(&self, errors: &mut Vec<String>) -> usize {
        let filter = RecordFilter::new().with_tier(TierId::Working);
        let count = self.deps.store.count_filtered(&filter);
        if count <= self.config.working_capacity {
            return 0;
        }

        let excess = count - self.config.working_capacity;
        let mut working = self.deps.store.list_filtered(&filter, count, 0);
        // Listing is heaviest first; the tail holds the lightest records.
        let lightest: BTreeSet<Uuid> = working.split_off(count - excess).into_iter().map(|r| r.id).collect();

        let mut demoted = 0;
        for id in lightest {
            match self.demote(id).await {
                Ok(true) => demoted += 1,
                Ok(false) => {}
                Err(e) => errors.push(format!("capacity demotion of {id} failed: {e}")),
            }
        }
        tracing::info!("Demoted {demoted} records over working capacity");
        demoted
    }
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConsolidationConfig::default();
        assert_eq!(config.interval(CycleType::Fast), chrono::Duration::minutes(90));
        assert_eq!(config.interval(CycleType::Slow), chrono::Duration::hours(6));
        assert_eq!(config.promotion_threshold, 0.7);
        assert_eq!(config.demotion_threshold, 0.2);
        assert_eq!(config.min_co_access, 2);
    }

    #[test]
    fn test_cycle_type_parsing() {
        assert_eq!("fast".parse::<CycleType>().unwrap(), CycleType::Fast);
        assert_eq!("Deep".parse::<CycleType>().unwrap(), CycleType::Slow);
        assert!("weekly".parse::<CycleType>().is_err());
        assert_eq!(CycleType::Slow.to_string(), "slow");
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = CycleOutcome::NotDue {
            next_due: Utc::now(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"not_due\""));
    }

    #[test]
    fn test_hours_between() {
        let now = Utc::now();
        assert!((hours_between(now - chrono::Duration::minutes(90), now) - 1.5).abs() < 1e-9);
        assert!(hours_between(now, now - chrono::Duration::hours(1)) < 0.0);
    }
}
