//! Memory types for the Eidetic cache
//!
//! Defines the record stored by the cache, the identifiers of the backing
//! tiers, and the context callers attach to a write.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EideticError;

/// A single memory unit stored in the cache.
///
/// Content is immutable once written. Weight and access bookkeeping change
/// only through the weight engine and the record store's update path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier, assigned at creation
    pub id: Uuid,
    /// The stored payload
    pub content: String,
    /// Declared content type as given by the caller (lowercased)
    pub content_type: String,
    /// Current retention weight in `[min_weight, 1.0]`
    pub weight: f32,
    /// Importance input to the initial weight
    pub importance_score: f32,
    /// Emotional significance input to the initial weight
    pub emotional_weight: f32,
    /// How many times this record has been recalled
    pub access_count: u32,
    /// When this record was created
    pub created_at: DateTime<Utc>,
    /// When this record was last recalled
    pub last_accessed_at: DateTime<Utc>,
    /// When consolidation last decayed this record
    #[serde(default)]
    pub last_decayed_at: Option<DateTime<Utc>>,
    /// Tiers currently holding this record (or its projection)
    pub tier_assignments: BTreeSet<TierId>,
    /// Related record id -> association strength in `[0, 1]`
    #[serde(default)]
    pub associations: HashMap<Uuid, f32>,
    /// Context captured at ingest
    #[serde(default)]
    pub context: StoreContext,
}

impl MemoryRecord {
    /// Create a new record with a fresh id and the given weight inputs
    pub fn new(
        content: String,
        content_type: &str,
        weight: f32,
        importance_score: f32,
        emotional_weight: f32,
        context: StoreContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content,
            content_type: content_type.trim().to_lowercase(),
            weight,
            importance_score: importance_score.clamp(0.0, 1.0),
            emotional_weight: emotional_weight.clamp(0.0, 1.0),
            access_count: 0,
            created_at: now,
            last_accessed_at: now,
            last_decayed_at: None,
            tier_assignments: BTreeSet::new(),
            associations: HashMap::new(),
            context,
        }
    }

    /// Record an access at the given instant
    ///
    /// `last_accessed_at` never moves backwards and never precedes `created_at`.
    pub fn mark_accessed_at(&mut self, at: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if at > self.last_accessed_at {
            self.last_accessed_at = at;
        }
    }

    /// Whether the record lives in at least one long-term tier
    pub fn in_long_term_tier(&self) -> bool {
        self.tier_assignments.iter().any(|t| t.is_long_term())
    }

    /// The instant decay should be measured from
    pub fn decay_anchor(&self) -> DateTime<Utc> {
        match self.last_decayed_at {
            Some(decayed) if decayed > self.last_accessed_at => decayed,
            _ => self.last_accessed_at,
        }
    }
}

/// Identifier of a backing storage tier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TierId {
    /// Fast key-value/document working store
    Working,
    /// Relational + vector long-term store
    Semantic,
    /// Graph store for procedures and skills
    Procedural,
    /// Priority / assessment store
    Priority,
}

impl TierId {
    pub const ALL: [TierId; 4] = [
        TierId::Working,
        TierId::Semantic,
        TierId::Procedural,
        TierId::Priority,
    ];

    /// Long-term tiers are the promotion targets of consolidation
    pub fn is_long_term(self) -> bool {
        matches!(self, TierId::Semantic | TierId::Procedural)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TierId::Working => "working",
            TierId::Semantic => "semantic",
            TierId::Procedural => "procedural",
            TierId::Priority => "priority",
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierId {
    type Err = EideticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "working" | "fast" => Ok(TierId::Working),
            "semantic" | "long-term" | "longterm" => Ok(TierId::Semantic),
            "procedural" => Ok(TierId::Procedural),
            "priority" | "assessment" => Ok(TierId::Priority),
            other => Err(EideticError::InvalidInput(format!("Unknown tier: {other}"))),
        }
    }
}

/// Declared kind of content, derived from the caller's content type string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Semantic,
    Procedural,
    Emotional,
    Contextual,
    Mixed,
}

impl ContentKind {
    /// Map a declared content type onto a kind; unknown types are contextual
    pub fn from_declared(content_type: &str) -> Self {
        match content_type.trim().to_lowercase().as_str() {
            "semantic" | "fact" | "knowledge" => ContentKind::Semantic,
            "procedural" | "procedure" | "skill" => ContentKind::Procedural,
            "emotional" => ContentKind::Emotional,
            "mixed" => ContentKind::Mixed,
            _ => ContentKind::Contextual,
        }
    }
}

/// Urgency flag carried in the write context
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn is_elevated(self) -> bool {
        matches!(self, Urgency::High | Urgency::Critical)
    }
}

impl FromStr for Urgency {
    type Err = EideticError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Urgency::Low),
            "normal" | "" => Ok(Urgency::Normal),
            "high" | "urgent" => Ok(Urgency::High),
            "critical" => Ok(Urgency::Critical),
            other => Err(EideticError::InvalidInput(format!("Unknown urgency: {other}"))),
        }
    }
}

/// Context attached to a write
///
/// Known flags are typed fields; anything else lands in `extra` and still
/// counts toward context richness during routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreContext {
    #[serde(default)]
    pub urgency: Urgency,
    /// Declared priority in `[0, 1]`
    #[serde(default)]
    pub priority: Option<f32>,
    /// Declared importance in `[0, 1]`
    #[serde(default)]
    pub importance: Option<f32>,
    /// Amplification hint; values above the routing threshold fan out everywhere
    #[serde(default)]
    pub amplification: Option<f32>,
    /// Where the content came from
    #[serde(default)]
    pub source: Option<String>,
    /// Free-form flags
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl StoreContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_amplification(mut self, amplification: f32) -> Self {
        self.amplification = Some(amplification);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Number of populated context fields
    pub fn richness(&self) -> usize {
        let typed = [
            self.urgency != Urgency::Normal,
            self.priority.is_some(),
            self.importance.is_some(),
            self.amplification.is_some(),
            self.source.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        typed + self.extra.len()
    }

    /// Whether any flag marks the content as critical or urgent
    pub fn is_urgent(&self) -> bool {
        self.urgency.is_elevated()
            || self.extra.contains_key("critical")
            || self.extra.contains_key("urgent")
    }
}

/// A non-fatal condition reported alongside a successful result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Some but not all tiers succeeded
    PartialFailure { failed: Vec<(TierId, String)> },
    /// A single tier was unreachable
    TierUnavailable { tier: TierId, reason: String },
    /// A tier did not answer before the deadline
    DeadlineExceeded { tier: TierId },
}
