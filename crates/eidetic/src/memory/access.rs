//! Access tracking for co-access association discovery
//!
//! Remembers which records were recalled together since the last slow
//! consolidation cycle. Both maps are LRU-bounded so a long-running process
//! never grows them without limit.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use lru::LruCache;
use uuid::Uuid;

/// Default capacity for both tracking caches
pub const DEFAULT_TRACKER_CAPACITY: usize = 4096;

/// Unordered pair of record ids, stored smallest first
pub type RecordPair = (Uuid, Uuid);

fn ordered_pair(a: Uuid, b: Uuid) -> RecordPair {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Debug)]
struct TrackerState {
    touched: LruCache<Uuid, DateTime<Utc>>,
    co_access: LruCache<RecordPair, u32>,
}

/// Tracks recently touched records and how often pairs are recalled together
#[derive(Debug)]
pub struct AccessTracker {
    state: Mutex<TrackerState>,
}

impl AccessTracker {
    /// Creates a tracker with the given capacity for each cache
    ///
    /// A capacity of 0 falls back to [`DEFAULT_TRACKER_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_TRACKER_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(TrackerState {
                touched: LruCache::new(cap),
                co_access: LruCache::new(cap),
            }),
        }
    }

    /// Record one recall that returned `ids` together
    pub fn record_recall(&self, ids: &[Uuid], at: DateTime<Utc>) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for id in ids {
            state.touched.put(*id, at);
        }

        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                if a == b {
                    continue;
                }
                let pair = ordered_pair(*a, *b);
                let count = state.co_access.get(&pair).copied().unwrap_or(0);
                state.co_access.put(pair, count.saturating_add(1));
            }
        }
    }

    /// Ids touched at or after `since`
    pub fn touched_since(&self, since: DateTime<Utc>) -> Vec<Uuid> {
        let state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state
            .touched
            .iter()
            .filter(|(_, at)| **at >= since)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Remove and return every pair co-accessed at least `min_count` times
    ///
    /// Pairs below the threshold are kept so they can accumulate further.
    pub fn drain_co_accessed(&self, min_count: u32) -> Vec<(RecordPair, u32)> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ready: Vec<(RecordPair, u32)> = state
            .co_access
            .iter()
            .filter(|(_, count)| **count >= min_count)
            .map(|(pair, count)| (*pair, *count))
            .collect();
        for (pair, _) in &ready {
            state.co_access.pop(pair);
        }
        ready
    }

    /// Number of pairs currently tracked
    pub fn pair_count(&self) -> usize {
        match self.state.lock() {
            Ok(guard) => guard.co_access.len(),
            Err(poisoned) => poisoned.into_inner().co_access.len(),
        }
    }

    /// Maximum capacity of each cache
    pub fn capacity(&self) -> usize {
        match self.state.lock() {
            Ok(guard) => guard.touched.cap().get(),
            Err(poisoned) => poisoned.into_inner().touched.cap().get(),
        }
    }
}

impl Default for AccessTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKER_CAPACITY)
    }
}
