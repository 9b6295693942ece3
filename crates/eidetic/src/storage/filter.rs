//! Filter types for record store listings
//!
//! Narrows listings and counts by tier, weight, age and declared type.

use chrono::{DateTime, Utc};

use crate::memory::types::{MemoryRecord, TierId};

/// Filter criteria for record listings.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Keep records assigned to any of these tiers (OR logic within this filter)
    pub tiers: Option<Vec<TierId>>,
    /// Minimum weight threshold (inclusive)
    pub min_weight: Option<f32>,
    /// Maximum weight threshold (exclusive)
    pub max_weight: Option<f32>,
    /// Only return records created at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Declared content type
    pub content_type: Option<String>,
}

impl RecordFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by tier membership
    pub fn with_tiers(mut self, tiers: Vec<TierId>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    /// Filter by a single tier
    pub fn with_tier(self, tier: TierId) -> Self {
        self.with_tiers(vec![tier])
    }

    /// Filter by minimum weight
    pub fn with_min_weight(mut self, min_weight: f32) -> Self {
        self.min_weight = Some(min_weight);
        self
    }

    /// Filter by maximum weight
    pub fn with_max_weight(mut self, max_weight: f32) -> Self {
        self.max_weight = Some(max_weight);
        self
    }

    /// Filter by creation time
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Filter by declared content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into().to_lowercase());
        self
    }

    /// Check whether a record passes every configured criterion
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(ref tiers) = self.tiers {
            if !tiers.is_empty() && !tiers.iter().any(|t| record.tier_assignments.contains(t)) {
                return false;
            }
        }

        if let Some(min_weight) = self.min_weight {
            if record.weight < min_weight {
                return false;
            }
        }

        if let Some(max_weight) = self.max_weight {
            if record.weight >= max_weight {
                return false;
            }
        }

        if let Some(ref since) = self.since {
            if record.created_at < *since {
                return false;
            }
        }

        if let Some(ref content_type) = self.content_type {
            if &record.content_type != content_type {
                return false;
            }
        }

        true
    }
}
