//! Routing Decision Engine
//!
//! Decides, once per content fingerprint, which tiers receive a record,
//! how the payload is shaped for each, in which order tiers are visited
//! and whether the write fans out in parallel or runs selectively.
//!
//! A decision is a pure function of the fingerprint and context: the same
//! inputs always produce the same decision, cached or not. When the
//! classifier fails or returns unusable signals the engine falls back to
//! writing everywhere instead of failing the write.

pub mod cache;
pub mod classifier;

pub use cache::{CacheStats, DecisionCache, fingerprint};
pub use classifier::{ContentClassifier, ContentSignals, KeywordClassifier};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::memory::types::{ContentKind, StoreContext, TierId};

const ACTION_WORDS: &[&str] = &["execute", "run", "process", "analyze", "create", "update"];
const TOOL_INDICATORS: &[&str] = &["tool", "combo", "sequence", "pipeline", "workflow"];

/// Fixed overhead added to a parallel fan-out estimate
const PARALLEL_OVERHEAD_MS: u64 = 50;

/// Routing thresholds and cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// A class signal strictly above this adds its tier (default: 0.0)
    #[serde(default = "default_signal_threshold")]
    pub signal_threshold: f32,
    /// Declared priority above this flags the record for assessment (default: 0.7)
    #[serde(default = "default_priority_threshold")]
    pub priority_threshold: f32,
    /// Amplification above this writes to every tier (default: 100.0)
    #[serde(default = "default_amplification_threshold")]
    pub amplification_threshold: f32,
    /// Declared priority above this forces a parallel write and visits the
    /// priority tier first (default: 0.8)
    #[serde(default = "default_parallel_priority_threshold")]
    pub parallel_priority_threshold: f32,
    /// Confidence above this allows a selective write (default: 0.8)
    #[serde(default = "default_selective_confidence")]
    pub selective_confidence: f32,
    /// Context confidence before richness is considered (default: 0.5)
    #[serde(default = "default_context_base_confidence")]
    pub context_base_confidence: f32,
    /// Added to context confidence for rich contexts (default: 0.3)
    #[serde(default = "default_context_rich_bonus")]
    pub context_rich_bonus: f32,
    /// A context with more than this many fields is rich (default: 3)
    #[serde(default = "default_context_rich_fields")]
    pub context_rich_fields: usize,
    /// Decision cache lifetime in seconds (default: 3600)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Characters of content that feed the fingerprint (default: 256)
    #[serde(default = "default_fingerprint_prefix_chars")]
    pub fingerprint_prefix_chars: usize,
    /// Characters kept in the working-tier preview (default: 100)
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    /// Similarity threshold handed to the semantic tier (default: 0.8)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Emotional signal at which emotional weight saturates (default: 3.0)
    #[serde(default = "default_emotional_saturation")]
    pub emotional_saturation: f32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            signal_threshold: default_signal_threshold(),
            priority_threshold: default_priority_threshold(),
            amplification_threshold: default_amplification_threshold(),
            parallel_priority_threshold: default_parallel_priority_threshold(),
            selective_confidence: default_selective_confidence(),
            context_base_confidence: default_context_base_confidence(),
            context_rich_bonus: default_context_rich_bonus(),
            context_rich_fields: default_context_rich_fields(),
            cache_ttl_secs: default_cache_ttl_secs(),
            fingerprint_prefix_chars: default_fingerprint_prefix_chars(),
            preview_chars: default_preview_chars(),
            similarity_threshold: default_similarity_threshold(),
            emotional_saturation: default_emotional_saturation(),
        }
    }
}

fn default_signal_threshold() -> f32 {
    0.0
}

fn default_priority_threshold() -> f32 {
    0.7
}

fn default_amplification_threshold() -> f32 {
    100.0
}

fn default_parallel_priority_threshold() -> f32 {
    0.8
}

fn default_selective_confidence() -> f32 {
    0.8
}

fn default_context_base_confidence() -> f32 {
    0.5
}

fn default_context_rich_bonus() -> f32 {
    0.3
}

fn default_context_rich_fields() -> usize {
    3
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_fingerprint_prefix_chars() -> usize {
    256
}

fn default_preview_chars() -> usize {
    100
}

fn default_similarity_threshold() -> f32 {
    0.8
}

fn default_emotional_saturation() -> f32 {
    3.0
}

/// How the fan-out visits the target tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Every target tier concurrently
    ParallelAll,
    /// One tier at a time, in priority order
    Selective,
}

/// Per-tier payload shaping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transformation {
    /// Truncated preview for fast lookups
    Working { preview: String },
    /// Full content with the similarity threshold the tier should apply
    Semantic { similarity_threshold: f32 },
    /// Relationship hints for the graph tier
    Procedural {
        action_words: Vec<String>,
        tool_mentions: Vec<String>,
    },
    /// Assessment flags for the priority tier
    Priority {
        urgent: bool,
        emotional: bool,
        priority: f32,
        assessment_required: bool,
    },
}

/// Where and how one record is written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Target tiers in processing order
    pub target_tiers: Vec<TierId>,
    pub transformations: BTreeMap<TierId, Transformation>,
    /// Visiting order over every tier; `target_tiers` follows it
    pub priority_order: Vec<TierId>,
    pub strategy: RoutingStrategy,
    pub confidence: f32,
    pub estimated_processing_ms: u64,
    /// Set when produced by the write-everywhere fallback
    pub fallback: bool,
    /// Signals the decision was derived from; `None` on fallback
    pub signals: Option<ContentSignals>,
}

impl RoutingDecision {
    /// Targets that are long-term tiers
    pub fn long_term_targets(&self) -> Vec<TierId> {
        self.target_tiers
            .iter()
            .copied()
            .filter(|t| t.is_long_term())
            .collect()
    }
}

/// Decision counters plus cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub decisions: u64,
    pub fallbacks: u64,
    pub cache: CacheStats,
}

fn tier_estimate_ms(tier: TierId) -> u64 {
    match tier {
        TierId::Working => 50,
        TierId::Semantic => 30,
        TierId::Procedural => 20,
        TierId::Priority => 10,
    }
}

fn matched_words(content: &str, words: &[&str]) -> Vec<String> {
    let lower = content.to_lowercase();
    words
        .iter()
        .filter(|w| lower.contains(*w))
        .map(|w| w.to_string())
        .collect()
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

/// Routing engine owning the classifier and decision cache
pub struct RoutingEngine {
    config: RoutingConfig,
    classifier: Arc<dyn ContentClassifier>,
    cache: DecisionCache,
    decisions: AtomicU64,
    fallbacks: AtomicU64,
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new(RoutingConfig::default(), Arc::new(KeywordClassifier::new()))
    }
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

impl RoutingEngine {
    pub fn new(config: RoutingConfig, classifier: Arc<dyn ContentClassifier>) -> Self {
        let cache = DecisionCache::new(Duration::from_secs(config.cache_ttl_secs));
        Self {
            config,
            classifier,
            cache,
            decisions: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> RoutingStats {
        RoutingStats {
            decisions: self.decisions.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }

    /// Decide routing for one record, consulting the cache first
    ///
    /// Fallback decisions are never cached, so a transient classifier
    /// failure does not outlive the write that hit it.
    pub fn decide(&self, content: &str, content_type: &str, context: &StoreContext) -> RoutingDecision {
        self.decisions.fetch_add(1, Ordering::Relaxed);
        let key = fingerprint(
            content,
            content_type,
            context,
            self.config.fingerprint_prefix_chars,
        );

        if let Some(decision) = self.cache.get(&key) {
            tracing::debug!("Routing cache hit for {}", &key[..12]);
            return decision;
        }

        let decision = self.decide_uncached(content, content_type, context);
        if !decision.fallback {
            self.cache.insert(key, decision.clone());
        }
        decision
    }

    /// Decide routing without touching the cache
    pub fn decide_uncached(
        &self,
        content: &str,
        content_type: &str,
        context: &StoreContext,
    ) -> RoutingDecision {
        let signals = match self
            .classifier
            .classify(content)
            .and_then(|s| s.validate().map(|_| s))
        {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!("{e}; falling back to full fan-out");
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                return self.fallback_decision(content, context);
            }
        };

        let cfg = &self.config;
        let kind = ContentKind::from_declared(content_type);
        let priority = context.priority.unwrap_or(0.0);
        let amplification = context.amplification.unwrap_or(1.0);

        let mut targets: BTreeSet<TierId> = [TierId::Working, TierId::Priority].into();
        if signals.semantic > cfg.signal_threshold || kind == ContentKind::Semantic {
            targets.insert(TierId::Semantic);
        }
        if signals.procedural > cfg.signal_threshold || kind == ContentKind::Procedural {
            targets.insert(TierId::Procedural);
        }
        if kind == ContentKind::Mixed || amplification > cfg.amplification_threshold {
            targets.extend(TierId::ALL);
        }

        let context_confidence = if context.richness() > cfg.context_rich_fields {
            cfg.context_base_confidence + cfg.context_rich_bonus
        } else {
            cfg.context_base_confidence
        };
        let confidence = ((signals.density() + context_confidence) / 2.0).clamp(0.0, 1.0);

        let strategy = if context.urgency.is_elevated() || priority > cfg.parallel_priority_threshold {
            RoutingStrategy::ParallelAll
        } else if confidence > cfg.selective_confidence {
            RoutingStrategy::Selective
        } else {
            RoutingStrategy::ParallelAll
        };

        let priority_order = self.priority_order(context);
        let target_tiers: Vec<TierId> = priority_order
            .iter()
            .copied()
            .filter(|t| targets.contains(t))
            .collect();

        let emotional = signals.emotional > cfg.signal_threshold || kind == ContentKind::Emotional;
        let transformations = target_tiers
            .iter()
            .map(|t| (*t, self.transformation(*t, content, context, emotional)))
            .collect();

        let estimated_processing_ms = estimate_ms(&target_tiers, strategy);

        RoutingDecision {
            target_tiers,
            transformations,
            priority_order,
            strategy,
            confidence,
            estimated_processing_ms,
            fallback: false,
            signals: Some(signals),
        }
    }

    /// Write-everywhere decision used when analysis is unusable
    pub fn fallback_decision(&self, content: &str, context: &StoreContext) -> RoutingDecision {
        let priority_order = self.priority_order(context);
        let transformations = priority_order
            .iter()
            .map(|t| (*t, self.transformation(*t, content, context, false)))
            .collect();
        let estimated_processing_ms = estimate_ms(&priority_order, RoutingStrategy::ParallelAll);

        RoutingDecision {
            target_tiers: priority_order.clone(),
            transformations,
            priority_order,
            strategy: RoutingStrategy::ParallelAll,
            confidence: 0.0,
            estimated_processing_ms,
            fallback: true,
            signals: None,
        }
    }

    fn priority_order(&self, context: &StoreContext) -> Vec<TierId> {
        let priority_first = context.urgency.is_elevated()
            || context.priority.unwrap_or(0.0) > self.config.parallel_priority_threshold;
        if priority_first {
            vec![
                TierId::Priority,
                TierId::Working,
                TierId::Semantic,
                TierId::Procedural,
            ]
        } else {
            vec![
                TierId::Working,
                TierId::Semantic,
                TierId::Procedural,
                TierId::Priority,
            ]
        }
    }

    /// Payload shaping for one tier
    pub fn transformation(
        &self,
        tier: TierId,
        content: &str,
        context: &StoreContext,
        emotional: bool,
    ) -> Transformation {
        match tier {
            TierId::Working => Transformation::Working {
                preview: truncate_chars(content, self.config.preview_chars),
            },
            TierId::Semantic => Transformation::Semantic {
                similarity_threshold: self.config.similarity_threshold,
            },
            TierId::Procedural => Transformation::Procedural {
                action_words: matched_words(content, ACTION_WORDS),
                tool_mentions: matched_words(content, TOOL_INDICATORS),
            },
            TierId::Priority => {
                let priority = context.priority.unwrap_or(0.5);
                let urgent = context.is_urgent();
                Transformation::Priority {
                    urgent,
                    emotional,
                    priority,
                    assessment_required: urgent
                        || emotional
                        || priority > self.config.priority_threshold,
                }
            }
        }
    }
}

fn estimate_ms(tiers: &[TierId], strategy: RoutingStrategy) -> u64 {
    match strategy {
        RoutingStrategy::ParallelAll => {
            tiers.iter().map(|t| tier_estimate_ms(*t)).max().unwrap_or(0) + PARALLEL_OVERHEAD_MS
        }
        RoutingStrategy::Selective => tiers.iter().map(|t| tier_estimate_ms(*t)).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Urgency;
    use crate::testing::FailingClassifier;

    mod selection {
        use super::*;

        #[test]
        fn test_always_includes_working_and_priority() {
            let engine = RoutingEngine::default();
            let d = engine.decide("plain note", "insight", &StoreContext::new());
            assert!(d.target_tiers.contains(&TierId::Working));
            assert!(d.target_tiers.contains(&TierId::Priority));
            assert!(!d.target_tiers.contains(&TierId::Semantic));
            assert!(!d.target_tiers.contains(&TierId::Procedural));
            assert!(!d.fallback);
        }

        #[test]
        fn test_declared_type_adds_tier() {
            let engine = RoutingEngine::default();
            let d = engine.decide("plain note", "semantic", &StoreContext::new());
            assert!(d.target_tiers.contains(&TierId::Semantic));

            let d = engine.decide("plain note", "procedural", &StoreContext::new());
            assert!(d.target_tiers.contains(&TierId::Procedural));
        }

        #[test]
        fn test_signals_add_tier() {
            let engine = RoutingEngine::default();
            let d = engine.decide(
                "Execute this step to understand the concept",
                "insight",
                &StoreContext::new(),
            );
            assert!(d.target_tiers.contains(&TierId::Semantic));
            assert!(d.target_tiers.contains(&TierId::Procedural));
        }

        #[test]
        fn test_mixed_and_amplification_select_all() {
            let engine = RoutingEngine::default();
            let mixed = engine.decide("plain note", "mixed", &StoreContext::new());
            assert_eq!(mixed.target_tiers.len(), TierId::ALL.len());

            let loud = engine.decide(
                "plain note",
                "insight",
                &StoreContext::new().with_amplification(150.0),
            );
            assert_eq!(loud.target_tiers.len(), TierId::ALL.len());
        }

        #[test]
        fn test_priority_tier_first_when_urgent() {
            let engine = RoutingEngine::default();
            let calm = engine.decide("plain note", "insight", &StoreContext::new());
            assert_eq!(calm.target_tiers.first(), Some(&TierId::Working));

            let urgent = engine.decide(
                "plain note",
                "insight",
                &StoreContext::new().with_priority(0.9),
            );
            assert_eq!(urgent.target_tiers.first(), Some(&TierId::Priority));
            assert_eq!(urgent.priority_order.first(), Some(&TierId::Priority));
        }
    }

    mod strategy {
        use super::*;

        #[test]
        fn test_urgency_forces_parallel() {
            let engine = RoutingEngine::default();
            let d = engine.decide(
                "weight-based eviction avoids TTL cliffs",
                "insight",
                &StoreContext::new().with_urgency(Urgency::High),
            );
            assert_eq!(d.strategy, RoutingStrategy::ParallelAll);
        }

        #[test]
        fn test_high_confidence_is_selective() {
            let engine = RoutingEngine::default();
            let ctx = StoreContext::new()
                .with_source("cli")
                .with_importance(0.6)
                .with_flag("project", "eidetic")
                .with_flag("session", "42");
            let d = engine.decide(
                "It is important to understand each step of the process",
                "insight",
                &ctx,
            );
            assert!(d.confidence > 0.8, "confidence was {}", d.confidence);
            assert_eq!(d.strategy, RoutingStrategy::Selective);
            let sum: u64 = d.target_tiers.iter().map(|t| tier_estimate_ms(*t)).sum();
            assert_eq!(d.estimated_processing_ms, sum);
        }

        #[test]
        fn test_low_confidence_hedges() {
            let engine = RoutingEngine::default();
            let d = engine.decide("plain note", "insight", &StoreContext::new());
            assert!((d.confidence - 0.25).abs() < 1e-6);
            assert_eq!(d.strategy, RoutingStrategy::ParallelAll);
            assert_eq!(d.estimated_processing_ms, 50 + PARALLEL_OVERHEAD_MS);
        }
    }

    mod transformations {
        use super::*;

        #[test]
        fn test_every_target_has_a_transformation() {
            let engine = RoutingEngine::default();
            let d = engine.decide("plain note", "mixed", &StoreContext::new());
            for tier in &d.target_tiers {
                assert!(d.transformations.contains_key(tier));
            }
        }

        #[test]
        fn test_working_preview_is_truncated() {
            let engine = RoutingEngine::default();
            let content = "é".repeat(300);
            let d = engine.decide(&content, "insight", &StoreContext::new());
            match &d.transformations[&TierId::Working] {
                Transformation::Working { preview } => assert_eq!(preview.chars().count(), 100),
                other => panic!("unexpected transformation {other:?}"),
            }
        }

        #[test]
        fn test_procedural_hints() {
            let engine = RoutingEngine::default();
            let d = engine.decide(
                "Run the build pipeline, then update the workflow",
                "procedural",
                &StoreContext::new(),
            );
            match &d.transformations[&TierId::Procedural] {
                Transformation::Procedural {
                    action_words,
                    tool_mentions,
                } => {
                    assert!(action_words.contains(&"run".to_string()));
                    assert!(action_words.contains(&"update".to_string()));
                    assert!(tool_mentions.contains(&"pipeline".to_string()));
                    assert!(tool_mentions.contains(&"workflow".to_string()));
                }
                other => panic!("unexpected transformation {other:?}"),
            }
        }

        #[test]
        fn test_priority_assessment_flags() {
            let engine = RoutingEngine::default();
            let d = engine.decide(
                "I feel this matters",
                "insight",
                &StoreContext::new().with_priority(0.75),
            );
            match &d.transformations[&TierId::Priority] {
                Transformation::Priority {
                    emotional,
                    assessment_required,
                    priority,
                    ..
                } => {
                    assert!(*emotional);
                    assert!(*assessment_required);
                    assert_eq!(*priority, 0.75);
                }
                other => panic!("unexpected transformation {other:?}"),
            }
        }
    }

    mod caching {
        use super::*;

        #[test]
        fn test_decisions_are_cached() {
            let engine = RoutingEngine::default();
            let ctx = StoreContext::new();
            let first = engine.decide("cache me", "insight", &ctx);
            let second = engine.decide("cache me", "insight", &ctx);
            assert_eq!(first, second);

            let stats = engine.stats();
            assert_eq!(stats.decisions, 2);
            assert_eq!(stats.cache.hits, 1);
            assert_eq!(stats.cache.misses, 1);
        }

        #[test]
        fn test_determinism_with_cache_cleared() {
            let engine = RoutingEngine::default();
            let ctx = StoreContext::new().with_priority(0.3);
            let first = engine.decide("Execute the deploy step", "procedural", &ctx);
            engine.clear_cache();
            let second = engine.decide("Execute the deploy step", "procedural", &ctx);
            assert_eq!(first.target_tiers, second.target_tiers);
            assert_eq!(first.strategy, second.strategy);
            assert_eq!(engine.stats().cache.hits, 0);
        }
    }

    mod fallback {
        use super::*;

        #[test]
        fn test_classifier_failure_falls_back() {
            let engine = RoutingEngine::new(RoutingConfig::default(), Arc::new(FailingClassifier));
            let d = engine.decide("anything", "semantic", &StoreContext::new());
            assert!(d.fallback);
            assert_eq!(d.strategy, RoutingStrategy::ParallelAll);
            assert_eq!(d.target_tiers.len(), TierId::ALL.len());
            assert_eq!(d.confidence, 0.0);
            assert!(d.signals.is_none());

            // Fallbacks are not cached
            assert!(engine.cache().is_empty());
            assert_eq!(engine.stats().fallbacks, 1);
        }
    }
}
