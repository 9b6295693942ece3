//! End-to-end tests for store and recall through the cache facade

use std::sync::Arc;

use eidetic::config::Config;
use eidetic::consolidation::CycleType;
use eidetic::memory::types::{MemoryRecord, StoreContext, TierId, Urgency, Warning};
use eidetic::router::{RoutingStrategy, Transformation};
use eidetic::testing::{FailingClassifier, FailingTier};
use eidetic::tier::{InMemoryTier, TierAdapter, TierPayload, TierRegistry};
use eidetic::storage::RecordStore;
use eidetic::{EideticCache, EideticError, RecallRequest};

fn partial_registry() -> TierRegistry {
    TierRegistry::new()
        .with_tier(Arc::new(InMemoryTier::new(TierId::Working)))
        .with_tier(Arc::new(InMemoryTier::new(TierId::Semantic)))
        .with_tier(Arc::new(FailingTier::new(TierId::Priority)))
}

#[tokio::test]
async fn urgent_content_is_stored_heavy_and_recalled() {
    let cache = EideticCache::in_memory(Config::default()).unwrap();
    let context = StoreContext::new()
        .with_urgency(Urgency::High)
        .with_source("pager");

    let receipt = cache
        .store("Production database failover completed", "semantic", context)
        .await
        .unwrap();
    assert!(receipt.weight >= 0.8);
    assert_eq!(receipt.strategy, RoutingStrategy::ParallelAll);

    let response = cache
        .recall(RecallRequest::new("database failover"))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, receipt.id);
    assert!(response.results[0].weight >= receipt.weight);
    assert!(response.warnings.is_empty());
}

#[tokio::test]
async fn high_urgency_insight_starts_heavy() {
    let cache = EideticCache::in_memory(Config::default()).unwrap();

    let receipt = cache
        .store(
            "weight-based eviction avoids TTL cliffs",
            "insight",
            StoreContext::new().with_urgency(Urgency::High),
        )
        .await
        .unwrap();

    let response = cache
        .recall(
            RecallRequest::new("TTL cliffs")
                .with_min_weight(0.0)
                .with_max_results(5),
        )
        .await
        .unwrap();
    let hit = response
        .results
        .iter()
        .find(|r| r.id == receipt.id)
        .unwrap();
    assert!(hit.weight >= 0.8);
}

#[tokio::test]
async fn one_failing_tier_out_of_three_is_tolerated() {
    let cache = EideticCache::new(Config::default(), partial_registry()).unwrap();

    let receipt = cache
        .store("Tokio runtimes drive async tasks", "semantic", StoreContext::default())
        .await
        .unwrap();
    assert_eq!(receipt.tiers, vec![TierId::Working, TierId::Semantic]);
    assert!(
        receipt
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::PartialFailure { .. }))
    );

    let record = cache.get(receipt.id).unwrap();
    assert!(!record.tier_assignments.contains(&TierId::Priority));

    let response = cache
        .recall(RecallRequest::new("async tasks").with_min_weight(0.0))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert!(!response.warnings.is_empty());

    let health = cache.stats().tiers;
    assert!(health[&TierId::Working].is_healthy());
    assert_eq!(health[&TierId::Priority].successes, 0);
    assert!(health[&TierId::Priority].failures >= 2);
}

#[tokio::test]
async fn classifier_failure_still_stores_everywhere() {
    let cache = EideticCache::with_parts(
        Config::default(),
        TierRegistry::in_memory(),
        Arc::new(FailingClassifier),
        RecordStore::new(),
    )
    .unwrap();

    let receipt = cache
        .store("content the classifier cannot read", "semantic", StoreContext::default())
        .await
        .unwrap();
    assert!(receipt.fallback);
    assert_eq!(receipt.tiers.len(), TierId::ALL.len());
}

#[tokio::test]
async fn put_is_idempotent_per_tier() {
    let tier = InMemoryTier::new(TierId::Semantic);
    let record = MemoryRecord::new(
        "idempotent".to_string(),
        "semantic",
        0.6,
        0.5,
        0.0,
        StoreContext::default(),
    );
    let payload = TierPayload {
        weight: record.weight,
        transformation: Transformation::Semantic {
            similarity_threshold: 0.8,
        },
    };

    let first = tier.put(&record, &payload).await.unwrap();
    let second = tier.put(&record, &payload).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(tier.len(), 1);
}

#[tokio::test]
async fn records_stay_addressable_below_every_floor() {
    let cache = EideticCache::in_memory(Config::default()).unwrap();
    let receipt = cache
        .store("rarely needed trivia", "semantic", StoreContext::new().with_importance(0.0))
        .await
        .unwrap();

    let response = cache
        .recall(RecallRequest::new("rarely needed trivia").with_min_weight(1.0))
        .await
        .unwrap();
    assert!(response.results.is_empty());

    let record = cache.get(receipt.id).unwrap();
    assert_eq!(record.access_count, 0);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let cache = EideticCache::in_memory(Config::default()).unwrap();

    assert!(matches!(
        cache.store("", "semantic", StoreContext::default()).await,
        Err(EideticError::InvalidInput(_))
    ));
    assert!(matches!(
        cache.recall(RecallRequest::new("x").with_min_weight(-0.1)).await,
        Err(EideticError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn tiers_filter_on_the_current_weight() {
    let cache = EideticCache::in_memory(Config::default()).unwrap();
    let receipt = cache
        .store("Paris is the capital of France", "semantic", StoreContext::default())
        .await
        .unwrap();
    assert!(receipt.tiers.contains(&TierId::Semantic));
    assert!(receipt.weight < 0.7);

    // Reinforce through the working tier only.
    for _ in 0..2 {
        cache
            .recall(
                RecallRequest::new("capital of France")
                    .with_min_weight(0.0)
                    .with_tiers(vec![TierId::Working]),
            )
            .await
            .unwrap();
    }
    let weight = cache.get(receipt.id).unwrap().weight;
    assert!(weight > 0.9);

    let response = cache
        .recall(
            RecallRequest::new("capital of France")
                .with_min_weight(0.9)
                .with_tiers(vec![TierId::Semantic]),
        )
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, receipt.id);

    // Decay reaches the tiers too.
    cache
        .run_cycle_at(
            CycleType::Fast,
            true,
            chrono::Utc::now() + chrono::Duration::days(3),
        )
        .await;
    let decayed = cache.get(receipt.id).unwrap().weight;
    assert!(decayed < 0.9);

    let response = cache
        .recall(
            RecallRequest::new("capital of France")
                .with_min_weight(decayed + 0.01)
                .with_tiers(vec![TierId::Semantic]),
        )
        .await
        .unwrap();
    assert!(response.results.is_empty());

    let response = cache
        .recall(
            RecallRequest::new("capital of France")
                .with_min_weight(decayed)
                .with_tiers(vec![TierId::Semantic]),
        )
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn strong_boost_keeps_tiers_in_step() {
    let mut config = Config::default();
    config.weight.boost_factor = 1.5;
    let cache = EideticCache::in_memory(config).unwrap();
    let receipt = cache
        .store("Paris is the capital of France", "semantic", StoreContext::default())
        .await
        .unwrap();

    let first = cache
        .recall(RecallRequest::new("capital of France").with_min_weight(0.0))
        .await
        .unwrap();
    let weight = first.results[0].weight;
    assert!(weight > receipt.weight);

    let second = cache
        .recall(RecallRequest::new("capital of France").with_min_weight(weight))
        .await
        .unwrap();
    assert_eq!(second.results.len(), 1);
}
