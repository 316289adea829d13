//! The structured cache store.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::live::{CacheUpdate, ChangeHub, ChangeSubscription};
use crate::types::{CacheEntry, CacheKey, EntityValue};
use crate::{CacheError, CacheResult};

/// A snapshot of the entries under a set of keys, including absent ones.
///
/// Produced before an optimistic patch and handed back to [`StructuredCache::restore`]
/// when the patch must be rolled back. Restoring an absent marker deletes the
/// entry, so a rolled-back placeholder insert leaves no trace.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    entries: Vec<(CacheKey, Option<CacheEntry>)>,
}

impl CacheSnapshot {
    /// The keys captured by this snapshot.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Look up the captured entry for a key.
    pub fn get(&self, key: &CacheKey) -> Option<&Option<CacheEntry>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, entry)| entry)
    }
}

/// Keyed store of entity snapshots addressed by `(kind, id)`.
///
/// Reads are synchronous clone-outs; writes bump the entry version and
/// notify subscribers after the write commits. The store itself never
/// talks to the network - the presence tracker, mutation coordinator, and
/// view aggregator are its only writers.
pub struct StructuredCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    hub: ChangeHub,
}

impl StructuredCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hub: ChangeHub::new(),
        }
    }

    /// Get a clone of the entry under a key.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries
            .read()
            .expect("lock poisoned")
            .get(key)
            .cloned()
    }

    /// Whether an entry exists under a key.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .expect("lock poisoned")
            .contains_key(key)
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or overwrite the entry under a key.
    ///
    /// An overwrite continues the existing version sequence.
    pub fn insert(&self, key: CacheKey, value: EntityValue) -> CacheEntry {
        let entry = {
            let mut entries = self.entries.write().expect("lock poisoned");
            let version = entries.get(&key).map(|e| e.version + 1).unwrap_or(1);
            let entry = CacheEntry { value, version };
            entries.insert(key.clone(), entry.clone());
            entry
        };
        self.hub.notify(CacheUpdate {
            key,
            entry: Some(entry.clone()),
        });
        entry
    }

    /// Mutate the entry under a key in place.
    ///
    /// Returns the updated entry, or [`CacheError::NotFound`] if no entry
    /// exists under the key.
    pub fn update(
        &self,
        key: &CacheKey,
        f: impl FnOnce(&mut EntityValue),
    ) -> CacheResult<CacheEntry> {
        let entry = {
            let mut entries = self.entries.write().expect("lock poisoned");
            let entry = entries
                .get_mut(key)
                .ok_or_else(|| CacheError::NotFound(key.clone()))?;
            f(&mut entry.value);
            entry.version += 1;
            entry.clone()
        };
        self.hub.notify(CacheUpdate {
            key: key.clone(),
            entry: Some(entry.clone()),
        });
        Ok(entry)
    }

    /// Mutate the entry under a key, inserting `init` first if absent.
    ///
    /// Used by the presence tracker, which creates a user record on first
    /// observation.
    pub fn update_or_insert(
        &self,
        key: &CacheKey,
        init: impl FnOnce() -> EntityValue,
        f: impl FnOnce(&mut EntityValue),
    ) -> CacheEntry {
        let entry = {
            let mut entries = self.entries.write().expect("lock poisoned");
            let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
                value: init(),
                version: 0,
            });
            f(&mut entry.value);
            entry.version += 1;
            entry.clone()
        };
        self.hub.notify(CacheUpdate {
            key: key.clone(),
            entry: Some(entry.clone()),
        });
        entry
    }

    /// Remove the entry under a key, notifying subscribers with an absent
    /// update. Returns the removed entry if one existed.
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = self.entries.write().expect("lock poisoned").remove(key);
        if removed.is_some() {
            self.hub.notify(CacheUpdate {
                key: key.clone(),
                entry: None,
            });
        }
        removed
    }

    /// Capture the exact current entries (or absence) under a set of keys.
    pub fn snapshot(&self, keys: &[CacheKey]) -> CacheSnapshot {
        let entries = self.entries.read().expect("lock poisoned");
        CacheSnapshot {
            entries: keys
                .iter()
                .map(|key| (key.clone(), entries.get(key).cloned()))
                .collect(),
        }
    }

    /// Write back a snapshot exactly, deleting entries that were absent when
    /// it was taken. This is the rollback primitive: after `restore` the
    /// entries under the snapshot's keys are structurally identical to the
    /// pre-snapshot state, versions included.
    pub fn restore(&self, snapshot: CacheSnapshot) {
        let mut updates = Vec::with_capacity(snapshot.entries.len());
        {
            let mut entries = self.entries.write().expect("lock poisoned");
            for (key, entry) in snapshot.entries {
                match entry {
                    Some(entry) => {
                        entries.insert(key.clone(), entry.clone());
                        updates.push(CacheUpdate {
                            key,
                            entry: Some(entry),
                        });
                    }
                    None => {
                        if entries.remove(&key).is_some() {
                            updates.push(CacheUpdate { key, entry: None });
                        }
                    }
                }
            }
        }
        for update in updates {
            self.hub.notify(update);
        }
    }

    /// Subscribe to changes under one key.
    pub fn subscribe(&self, key: &CacheKey) -> ChangeSubscription {
        self.hub.subscribe(key)
    }

    /// The change hub, exposed for observer plumbing and tests.
    pub fn hub(&self) -> &ChangeHub {
        &self.hub
    }
}

impl Default for StructuredCache {
    fn default() -> Self {
        Self::new()
    }
}
