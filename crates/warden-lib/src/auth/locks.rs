//! Per-entity async locks.
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one mutex per entity key.
///
/// Entries are inserted on first acquisition. [`LockRegistry::evict`]
/// removes one unconditionally once its entity is gone for good;
/// [`LockRegistry::evict_if_idle`] removes one only when no task holds or
/// waits on it, so it is safe to call after every use.
///
/// Guards are owned by the acquiring task rather than a thread, so the task
/// may await while holding one and keeps exclusive access throughout.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        // clone the Arc out so no shard guard is held across the await
        let lock = Arc::clone(&*self.locks.entry(key.to_string()).or_default());
        lock.lock_owned().await
    }

    pub fn evict(&self, key: &str) {
        self.locks.remove(key);
    }

    /// Remove the entry if the registry holds the only reference. Returns
    /// whether it was removed.
    pub fn evict_if_idle(&self, key: &str) -> bool {
        // acquire clones under the same shard lock, so the count cannot race
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }
}
