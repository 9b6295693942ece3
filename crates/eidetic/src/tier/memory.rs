//! In-process tier backed by a hash map
//!
//! Scores hits by keyword overlap: a full phrase match scores highest,
//! otherwise the fraction of query words present in the content.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::types::{MemoryRecord, TierId};
use crate::tier::{TierAdapter, TierHit, TierPayload, TierRecordRef};

const PHRASE_BASE_SCORE: f32 = 0.7;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    content: String,
    payload: TierPayload,
}

/// Hash-map tier with keyword search
#[derive(Debug)]
pub struct InMemoryTier {
    id: TierId,
    entries: RwLock<HashMap<Uuid, Entry>>,
}

impl InMemoryTier {
    pub fn new(id: TierId) -> Self {
        Self {
            id,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records currently held by the tier
    pub fn len(&self) -> usize {
        self.read(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, record_id: Uuid) -> bool {
        self.read(|entries| entries.contains_key(&record_id))
    }

    /// Weight the tier currently associates with a record
    pub fn weight_of(&self, record_id: Uuid) -> Option<f32> {
        self.read(|entries| entries.get(&record_id).map(|e| e.payload.weight))
    }

    fn read<R>(&self, f: impl FnOnce(&HashMap<Uuid, Entry>) -> R) -> R {
        match self.entries.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, Entry>) -> R) -> R {
        match self.entries.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn tier_ref(&self, record_id: Uuid) -> TierRecordRef {
        TierRecordRef {
            tier: self.id,
            record_id,
            key: format!("{}:{}", self.id, record_id),
        }
    }
}

/// Keyword match score of `content` against `query`, in `[0, 1]`
pub fn keyword_score(query: &str, content: &str) -> f32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    let content = content.to_lowercase();

    let words: Vec<&str> = query.split_whitespace().collect();
    let matched = words.iter().filter(|w| content.contains(**w)).count();
    let fraction = matched as f32 / words.len() as f32;

    if content.contains(&query) {
        PHRASE_BASE_SCORE + (1.0 - PHRASE_BASE_SCORE) * fraction
    } else {
        PHRASE_BASE_SCORE * fraction
    }
}

#[async_trait]
impl TierAdapter for InMemoryTier {
    fn id(&self) -> TierId {
        self.id
    }

    async fn put(&self, record: &MemoryRecord, payload: &TierPayload) -> Result<TierRecordRef> {
        self.write(|entries| {
            entries.insert(
                record.id,
                Entry {
                    content: record.content.clone(),
                    payload: payload.clone(),
                },
            );
        });
        Ok(self.tier_ref(record.id))
    }

    async fn search(&self, query: &str, min_weight: f32, limit: usize) -> Result<Vec<TierHit>> {
        let mut hits: Vec<TierHit> = self.read(|entries| {
            entries
                .iter()
                .filter(|(_, e)| e.payload.weight >= min_weight)
                .filter_map(|(id, e)| {
                    let score = keyword_score(query, &e.content);
                    (score > 0.0).then(|| TierHit {
                        record_id: *id,
                        tier: self.id,
                        score,
                        weight: e.payload.weight,
                        tier_ref: self.tier_ref(*id),
                    })
                })
                .collect()
        });

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn set_weight(&self, record_id: Uuid, weight: f32) -> Result<()> {
        self.write(|entries| {
            if let Some(entry) = entries.get_mut(&record_id) {
                entry.payload.weight = weight.clamp(0.0, 1.0);
            }
        });
        Ok(())
    }

    async fn remove(&self, record_id: Uuid) -> Result<()> {
        self.write(|entries| {
            entries.remove(&record_id);
        });
        Ok(())
    }
}
