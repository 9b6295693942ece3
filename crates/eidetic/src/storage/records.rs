//! Record store for the Eidetic cache
//!
//! Holds every `MemoryRecord` keyed by id in a sharded concurrent map. There
//! is deliberately no delete operation: records only ever gain accesses,
//! change weight, or change tier assignments.
//!
//! The store snapshots to a JSON file so a process restart keeps every
//! record, weight and association.

use std::collections::BTreeMap;
use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EideticError, Result};
use crate::memory::types::MemoryRecord;
use crate::memory::weight::{WeightBands, WeightCategory};
use crate::storage::filter::RecordFilter;

/// File name of the snapshot inside the data directory
pub const SNAPSHOT_FILE: &str = "records.json";

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<MemoryRecord>,
}

/// Concurrent, append-only store of memory records
#[derive(Debug, Default)]
pub struct RecordStore {
    records: DashMap<Uuid, MemoryRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record
    ///
    /// Fails if the id already exists; records are never overwritten.
    pub fn insert(&self, record: MemoryRecord) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(EideticError::Storage(format!(
                "Record already exists: {}",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Get a copy of a record by id
    pub fn get(&self, id: Uuid) -> Option<MemoryRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.records.contains_key(&id)
    }

    /// Apply a mutation to one record and return its result
    ///
    /// The record's shard is locked only for the duration of `f`, which must
    /// not block or await.
    pub fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut MemoryRecord) -> R) -> Result<R> {
        let mut entry = self.records.get_mut(&id).ok_or(EideticError::NotFound(id))?;
        Ok(f(entry.value_mut()))
    }

    /// Strengthen the association between two records in both directions
    ///
    /// Returns the new strength, capped at 1.0. Self-associations are ignored.
    pub fn strengthen_association(&self, a: Uuid, b: Uuid, increment: f32) -> Result<f32> {
        if a == b {
            return Ok(0.0);
        }
        if !self.contains(a) {
            return Err(EideticError::NotFound(a));
        }
        if !self.contains(b) {
            return Err(EideticError::NotFound(b));
        }

        let increment = increment.max(0.0);
        // Each side is updated under its own shard lock, never both at once.
        let forward = self.update(a, |record| {
            let strength = record.associations.entry(b).or_insert(0.0);
            *strength = (*strength + increment).min(1.0);
            *strength
        })?;
        self.update(b, |record| {
            record.associations.insert(a, forward);
        })?;
        Ok(forward)
    }

    /// All record ids in ascending order
    pub fn ids_sorted(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.records.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// Copies of every record matching the filter, highest weight first
    pub fn list_filtered(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Vec<MemoryRecord> {
        let mut records: Vec<MemoryRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        records.into_iter().skip(offset).take(limit).collect()
    }

    pub fn count_filtered(&self, filter: &RecordFilter) -> usize {
        self.records.iter().filter(|r| filter.matches(r.value())).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count of records per weight band; every band is present
    pub fn band_counts(&self, bands: &WeightBands) -> BTreeMap<WeightCategory, usize> {
        let mut counts: BTreeMap<WeightCategory, usize> =
            WeightCategory::ALL.iter().map(|c| (*c, 0)).collect();
        for record in self.records.iter() {
            *counts.entry(bands.categorize(record.weight)).or_insert(0) += 1;
        }
        counts
    }

    /// Write a snapshot of every record to `path`
    ///
    /// Writes to a sibling temp file first and renames it into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut records: Vec<MemoryRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            records,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        tracing::debug!(
            "Saved {} records to {}",
            snapshot.records.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a snapshot written by [`RecordStore::save`]
    ///
    /// A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        let store = Self::new();
        if !path.exists() {
            tracing::info!("No snapshot at {}, starting empty", path.display());
            return Ok(store);
        }

        let bytes = std::fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EideticError::Storage(format!(
                "Unsupported snapshot version {} in {}",
                snapshot.version,
                path.display()
            )));
        }

        for record in snapshot.records {
            store.insert(record)?;
        }
        tracing::info!("Loaded {} records from {}", store.len(), path.display());
        Ok(store)
    }
}
