//! Synthesis Engine
//!
//! Turns per-tier fan-out outcomes into one answer:
//! - writes: successful tiers become the record's tier assignments, failed
//!   tiers become warnings, and zero successes is a hard error
//! - reads: hits are merged per record, re-filtered against the record
//!   store's weight, ranked and truncated
//! - associations: records confirmed by several tiers at once, and pairs
//!   found by consolidation, are linked symmetrically in the record store

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EideticError, Result};
use crate::fanout::{TierOutcome, failure_reason};
use crate::memory::types::{TierId, Warning};
use crate::storage::RecordStore;
use crate::tier::{TierHit, TierRecordRef};

/// Ranking and association tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Share of the match score in the rank (default: 0.7)
    #[serde(default = "default_score_weight")]
    pub score_weight: f32,
    /// Share of the record weight in the rank (default: 0.3)
    #[serde(default = "default_weight_weight")]
    pub weight_weight: f32,
    /// Minimum per-tier score for a cross-tier confirmation (default: 0.7)
    #[serde(default = "default_cross_tier_threshold")]
    pub cross_tier_threshold: f32,
    /// Strength added per association update (default: 0.1)
    #[serde(default = "default_association_increment")]
    pub association_increment: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            score_weight: default_score_weight(),
            weight_weight: default_weight_weight(),
            cross_tier_threshold: default_cross_tier_threshold(),
            association_increment: default_association_increment(),
        }
    }
}

fn default_score_weight() -> f32 {
    0.7
}

fn default_weight_weight() -> f32 {
    0.3
}

fn default_cross_tier_threshold() -> f32 {
    0.7
}

fn default_association_increment() -> f32 {
    0.1
}

/// What a write fan-out left behind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteSummary {
    /// Tiers that accepted the record, in fan-out order
    pub tiers: Vec<TierId>,
    pub warnings: Vec<Warning>,
}

/// One merged, ranked recall result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub id: Uuid,
    pub content: String,
    pub content_type: String,
    /// Best match score across contributing tiers
    pub score: f32,
    /// Authoritative weight from the record store
    pub weight: f32,
    /// `score * score_weight + weight * weight_weight`
    pub rank_score: f32,
    /// Every tier that returned this record
    pub tiers: Vec<TierId>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(skip)]
    pub tier_refs: Vec<TierRecordRef>,
}

/// Merged read outcome
#[derive(Debug, Clone, Default)]
pub struct MergedHits {
    pub results: Vec<RankedResult>,
    /// Records confirmed by two or more tiers above the threshold
    pub cross_tier: Vec<Uuid>,
    pub warnings: Vec<Warning>,
}

#[derive(Default)]
struct Accumulated {
    score: f32,
    tiers: BTreeSet<TierId>,
    confirming: BTreeSet<TierId>,
    refs: Vec<TierRecordRef>,
}

/// Merges fan-out outcomes and writes associations
#[derive(Debug, Clone)]
pub struct SynthesisEngine {
    config: SynthesisConfig,
    store: Arc<RecordStore>,
}

impl SynthesisEngine {
    pub fn new(config: SynthesisConfig, store: Arc<RecordStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Record which tiers accepted a write
    ///
    /// Succeeds when at least one tier did; the failed tiers are reported
    /// as warnings. With no successes nothing is recorded and the error
    /// names every failed tier.
    pub fn apply_write<T>(&self, record_id: Uuid, outcomes: &[TierOutcome<T>]) -> Result<WriteSummary> {
        let (succeeded, failed) = split_outcomes(outcomes);
        if succeeded.is_empty() {
            return Err(EideticError::AllTiersFailed(failed));
        }

        self.store.update(record_id, |record| {
            record.tier_assignments.extend(succeeded.iter().copied());
        })?;

        Ok(WriteSummary {
            tiers: succeeded,
            warnings: warnings_for(outcomes, &failed),
        })
    }

    /// Merge search hits from every tier into one ranked list
    pub fn merge_hits(
        &self,
        outcomes: Vec<TierOutcome<Vec<TierHit>>>,
        min_weight: f32,
        limit: usize,
    ) -> Result<MergedHits> {
        let (succeeded, failed) = split_outcomes(&outcomes);
        if succeeded.is_empty() && !outcomes.is_empty() {
            return Err(EideticError::AllTiersFailed(failed));
        }
        let warnings = warnings_for(&outcomes, &failed);

        let mut merged: BTreeMap<Uuid, Accumulated> = BTreeMap::new();
        for outcome in outcomes {
            let Ok(hits) = outcome.result else { continue };
            for hit in hits {
                let entry = merged.entry(hit.record_id).or_default();
                entry.score = entry.score.max(hit.score);
                entry.tiers.insert(hit.tier);
                if hit.score >= self.config.cross_tier_threshold {
                    entry.confirming.insert(hit.tier);
                }
                entry.refs.push(hit.tier_ref);
            }
        }

        let mut results = Vec::with_capacity(merged.len());
        let mut cross_tier = Vec::new();
        for (id, acc) in merged {
            let Some(record) = self.store.get(id) else {
                tracing::debug!("Dropping hit for unknown record {id}");
                continue;
            };
            if record.weight < min_weight {
                continue;
            }
            if acc.confirming.len() >= 2 {
                cross_tier.push(id);
            }
            results.push(RankedResult {
                id,
                content: record.content,
                content_type: record.content_type,
                score: acc.score,
                weight: record.weight,
                rank_score: acc.score * self.config.score_weight
                    + record.weight * self.config.weight_weight,
                tiers: acc.tiers.into_iter().collect(),
                last_accessed_at: record.last_accessed_at,
                tier_refs: acc.refs,
            });
        }

        rank(&mut results);
        results.truncate(limit);

        Ok(MergedHits {
            results,
            cross_tier,
            warnings,
        })
    }

    /// Strengthen every pair among `ids`; returns how many pairs changed
    pub fn strengthen_group(&self, ids: &[Uuid]) -> usize {
        let mut pairs = Vec::new();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                pairs.push((*a, *b));
            }
        }
        self.apply_associations(&pairs)
    }

    /// Strengthen each pair symmetrically by the configured increment
    pub fn apply_associations(&self, pairs: &[(Uuid, Uuid)]) -> usize {
        let mut applied = 0;
        for (a, b) in pairs {
            if a == b {
                continue;
            }
            match self
                .store
                .strengthen_association(*a, *b, self.config.association_increment)
            {
                Ok(strength) => {
                    tracing::debug!("Association {a} <-> {b} now {strength:.2}");
                    applied += 1;
                }
                Err(e) => tracing::warn!("Skipping association {a} <-> {b}: {e}"),
            }
        }
        applied
    }
}

/// Sort by rank score, then most recent access, then id
pub fn rank(results: &mut [RankedResult]) {
    results.sort_by(|a, b| {
        b.rank_score
            .total_cmp(&a.rank_score)
            .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn split_outcomes<T>(outcomes: &[TierOutcome<T>]) -> (Vec<TierId>, Vec<(TierId, String)>) {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    for outcome in outcomes {
        match &outcome.result {
            Ok(_) => {
                if !succeeded.contains(&outcome.tier) {
                    succeeded.push(outcome.tier);
                }
            }
            Err(e) => failed.push((outcome.tier, failure_reason(e))),
        }
    }
    (succeeded, failed)
}

fn warnings_for<T>(outcomes: &[TierOutcome<T>], failed: &[(TierId, String)]) -> Vec<Warning> {
    if failed.is_empty() {
        return Vec::new();
    }
    let mut warnings: Vec<Warning> = outcomes.iter().filter_map(|o| o.warning()).collect();
    warnings.push(Warning::PartialFailure {
        failed: failed.to_vec(),
    });
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryRecord, StoreContext};
    use std::time::Duration;

    fn store_with(weights: &[f32]) -> (Arc<RecordStore>, Vec<Uuid>) {
        let store = Arc::new(RecordStore::new());
        let mut ids = Vec::new();
        for w in weights {
            let record = MemoryRecord::new(
                format!("record {w}"),
                "semantic",
                *w,
                0.5,
                0.0,
                StoreContext::default(),
            );
            ids.push(record.id);
            store.insert(record).unwrap();
        }
        (store, ids)
    }

    fn ok<T>(tier: TierId, value: T) -> TierOutcome<T> {
        TierOutcome {
            tier,
            result: Ok(value),
            elapsed: Duration::from_millis(1),
            attempts: 1,
        }
    }

    fn failed<T>(tier: TierId) -> TierOutcome<T> {
        TierOutcome {
            tier,
            result: Err(EideticError::TierUnavailable {
                tier,
                reason: "down".to_string(),
            }),
            elapsed: Duration::from_millis(1),
            attempts: 1,
        }
    }

    fn hit(id: Uuid, tier: TierId, score: f32) -> TierHit {
        TierHit {
            record_id: id,
            tier,
            score,
            weight: 1.0,
            tier_ref: TierRecordRef {
                tier,
                record_id: id,
                key: id.to_string(),
            },
        }
    }

    mod writes {
        use super::*;

        #[test]
        fn test_partial_success_records_tiers_and_warns() {
            let (store, ids) = store_with(&[0.5]);
            let engine = SynthesisEngine::new(SynthesisConfig::default(), Arc::clone(&store));
            let outcomes = vec![
                ok(TierId::Working, ()),
                failed(TierId::Semantic),
                ok(TierId::Priority, ()),
            ];

            let summary = engine.apply_write(ids[0], &outcomes).unwrap();
            assert_eq!(summary.tiers, vec![TierId::Working, TierId::Priority]);
            assert!(summary.warnings.contains(&Warning::PartialFailure {
                failed: vec![(TierId::Semantic, "down".to_string())],
            }));

            let record = store.get(ids[0]).unwrap();
            assert!(record.tier_assignments.contains(&TierId::Working));
            assert!(!record.tier_assignments.contains(&TierId::Semantic));
        }

        #[test]
        fn test_zero_successes_is_hard_error() {
            let (store, ids) = store_with(&[0.5]);
            let engine = SynthesisEngine::new(SynthesisConfig::default(), Arc::clone(&store));
            let outcomes: Vec<TierOutcome<()>> =
                vec![failed(TierId::Working), failed(TierId::Priority)];

            match engine.apply_write(ids[0], &outcomes) {
                Err(EideticError::AllTiersFailed(failures)) => assert_eq!(failures.len(), 2),
                other => panic!("unexpected {other:?}"),
            }
            assert!(store.get(ids[0]).unwrap().tier_assignments.is_empty());
        }
    }

    mod reads {
        use super::*;

        #[test]
        fn test_merge_dedupes_and_ranks() {
            let (store, ids) = store_with(&[0.9, 0.2]);
            let engine = SynthesisEngine::new(SynthesisConfig::default(), store);
            let outcomes = vec![
                ok(TierId::Working, vec![hit(ids[0], TierId::Working, 0.5), hit(ids[1], TierId::Working, 0.6)]),
                ok(TierId::Semantic, vec![hit(ids[0], TierId::Semantic, 0.8)]),
            ];

            let merged = engine.merge_hits(outcomes, 0.0, 10).unwrap();
            assert_eq!(merged.results.len(), 2);
            let top = &merged.results[0];
            assert_eq!(top.id, ids[0]);
            assert_eq!(top.tiers, vec![TierId::Working, TierId::Semantic]);
            assert!((top.score - 0.8).abs() < 1e-6);
            assert!((top.rank_score - (0.8 * 0.7 + 0.9 * 0.3)).abs() < 1e-6);
        }

        #[test]
        fn test_store_weight_is_authoritative() {
            let (store, ids) = store_with(&[0.3]);
            let engine = SynthesisEngine::new(SynthesisConfig::default(), store);
            // Tier still believes the record weighs 1.0
            let outcomes = vec![ok(TierId::Working, vec![hit(ids[0], TierId::Working, 0.9)])];
            let merged = engine.merge_hits(outcomes, 0.5, 10).unwrap();
            assert!(merged.results.is_empty());
        }

        #[test]
        fn test_ties_prefer_recent_access() {
            let (store, ids) = store_with(&[0.5, 0.5]);
            store
                .update(ids[1], |r| r.last_accessed_at += chrono::Duration::hours(1))
                .unwrap();
            let engine = SynthesisEngine::new(SynthesisConfig::default(), store);
            let outcomes = vec![ok(
                TierId::Working,
                vec![hit(ids[0], TierId::Working, 0.7), hit(ids[1], TierId::Working, 0.7)],
            )];
            let merged = engine.merge_hits(outcomes, 0.0, 1).unwrap();
            assert_eq!(merged.results.len(), 1);
            assert_eq!(merged.results[0].id, ids[1]);
        }

        #[test]
        fn test_all_failed_read_is_error() {
            let (store, _) = store_with(&[]);
            let engine = SynthesisEngine::new(SynthesisConfig::default(), store);
            let outcomes: Vec<TierOutcome<Vec<TierHit>>> = vec![failed(TierId::Working)];
            assert!(matches!(
                engine.merge_hits(outcomes, 0.0, 10),
                Err(EideticError::AllTiersFailed(_))
            ));
        }

        #[test]
        fn test_cross_tier_confirmation() {
            let (store, ids) = store_with(&[0.5, 0.5]);
            let engine = SynthesisEngine::new(SynthesisConfig::default(), store);
            let outcomes = vec![
                ok(TierId::Working, vec![hit(ids[0], TierId::Working, 0.9), hit(ids[1], TierId::Working, 0.9)]),
                ok(TierId::Semantic, vec![hit(ids[0], TierId::Semantic, 0.8), hit(ids[1], TierId::Semantic, 0.3)]),
            ];
            let merged = engine.merge_hits(outcomes, 0.0, 10).unwrap();
            assert_eq!(merged.cross_tier, vec![ids[0]]);
        }
    }

    mod associations {
        use super::*;

        #[test]
        fn test_strengthen_group_links_every_pair() {
            let (store, ids) = store_with(&[0.5, 0.5, 0.5]);
            let engine = SynthesisEngine::new(SynthesisConfig::default(), Arc::clone(&store));
            assert_eq!(engine.strengthen_group(&ids), 3);

            let a = store.get(ids[0]).unwrap();
            assert!((a.associations[&ids[1]] - 0.1).abs() < 1e-6);
            assert!((a.associations[&ids[2]] - 0.1).abs() < 1e-6);
            let c = store.get(ids[2]).unwrap();
            assert!((c.associations[&ids[0]] - 0.1).abs() < 1e-6);
        }

        #[test]
        fn test_missing_records_are_skipped() {
            let (store, ids) = store_with(&[0.5]);
            let engine = SynthesisEngine::new(SynthesisConfig::default(), store);
            assert_eq!(engine.apply_associations(&[(ids[0], Uuid::new_v4())]), 0);
        }
    }
}
