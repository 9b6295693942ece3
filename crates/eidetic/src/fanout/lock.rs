//! Per-record write serialization
//!
//! Fan-outs for the same record id queue behind one async mutex; different
//! ids never contend. Entries are removed once the last holder releases.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// Registry of per-id async mutexes
#[derive(Debug, Clone, Default)]
pub struct IdLocks {
    locks: Arc<LockMap>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`
    pub async fn lock(&self, id: Uuid) -> IdLockGuard {
        let mutex = Arc::clone(
            self.locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = Arc::clone(&mutex).lock_owned().await;
        IdLockGuard {
            id,
            locks: Arc::clone(&self.locks),
            mutex,
            guard: Some(guard),
        }
    }

    /// Number of ids currently locked or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held while a fan-out for one id is in flight
#[derive(Debug)]
pub struct IdLockGuard {
    id: Uuid,
    locks: Arc<LockMap>,
    mutex: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl IdLockGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for IdLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map and this guard hold the only references when nobody waits.
        self.locks.remove_if(&self.id, |_, m| {
            Arc::ptr_eq(m, &self.mutex) && Arc::strong_count(m) <= 2
        });
    }
}
