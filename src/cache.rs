//! Concurrent in-memory cache of server locations.
//!
//! Two `DashMap`s hold the same [`IndexEntry`] values, keyed by
//! `(partition, name)` and by `id`. Callers never lock. Lookups read the
//! maps directly; mutations take a short internal write lock so the two
//! maps change together and the entry count never exceeds `max_entries`.
//! Between concurrent writers the last one wins.
//!
//! Hit and miss counters are only touched by the lookup methods, so a
//! disabled index that never consults the cache leaves the stats untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::models::IndexEntry;

type NameKey = (String, String);

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: u64,
    /// When the last periodic or manual resync finished.
    pub last_resync_at: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn new(hits: u64, misses: u64, evictions: u64, size: u64) -> Self {
        Self {
            hits,
            misses,
            evictions,
            size,
            last_resync_at: None,
        }
    }

    /// `hits / (hits + misses)`, or 0 when nothing was looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct CacheIndex {
    by_name: DashMap<NameKey, IndexEntry>,
    by_id: DashMap<String, IndexEntry>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    last_resync_at: RwLock<Option<DateTime<Utc>>>,
    /// Serializes mutations across both maps.
    writes: Mutex<()>,
}

impl CacheIndex {
    pub fn new(max_entries: usize) -> Self {
        Self {
            by_name: DashMap::new(),
            by_id: DashMap::new(),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            last_resync_at: RwLock::new(None),
            writes: Mutex::new(()),
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<IndexEntry> {
        let found = self.by_id.get(id).map(|e| e.value().clone());
        self.record_lookup(found.is_some());
        found
    }

    pub fn get_by_name(&self, partition: &str, name: &str) -> Option<IndexEntry> {
        let found = self
            .by_name
            .get(&(partition.to_string(), name.to_string()))
            .map(|e| e.value().clone());
        self.record_lookup(found.is_some());
        found
    }

    /// Insert or replace the entry for `(partition, name)`.
    ///
    /// A previous entry under the same name but another id, or under the
    /// same id but another name, is dropped so both maps stay in step. A new
    /// key at capacity evicts one arbitrary entry first.
    pub fn update_index(&self, partition: &str, name: &str, id: &str) {
        let _guard = self.write_guard();
        let entry = IndexEntry::new(partition, name, id);
        let name_key = (partition.to_string(), name.to_string());

        let is_new = !self.by_name.contains_key(&name_key) && !self.by_id.contains_key(id);
        if is_new && self.by_name.len() >= self.max_entries {
            self.evict_one();
        }

        if let Some(old) = self.by_name.insert(name_key, entry.clone()) {
            if old.id != id {
                self.by_id.remove_if(&old.id, |_, e| e.partition == partition && e.name == name);
            }
        }
        if let Some(old) = self.by_id.insert(id.to_string(), entry) {
            if old.partition != partition || old.name != name {
                self.by_name
                    .remove_if(&(old.partition, old.name), |_, e| e.id == id);
            }
        }
    }

    /// Drop the entry for `(partition, name)`; a missing key is a no-op.
    pub fn remove_by_name(&self, partition: &str, name: &str) {
        let _guard = self.write_guard();
        self.unlink_name(partition, name);
    }

    /// Drop the entry for `id`; a missing key is a no-op.
    pub fn remove_by_id(&self, id: &str) {
        let _guard = self.write_guard();
        if let Some((_, old)) = self.by_id.remove(id) {
            self.by_name
                .remove_if(&(old.partition, old.name), |_, e| e.id == id);
        }
    }

    pub fn clear(&self) {
        let _guard = self.write_guard();
        self.by_name.clear();
        self.by_id.clear();
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn mark_resynced(&self, at: DateTime<Utc>) {
        if let Ok(mut last) = self.last_resync_at.write() {
            *last = Some(at);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.by_name.len() as u64,
            last_resync_at: self.last_resync_at.read().ok().and_then(|t| *t),
        }
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds the write guard.
    fn unlink_name(&self, partition: &str, name: &str) {
        if let Some((_, old)) = self
            .by_name
            .remove(&(partition.to_string(), name.to_string()))
        {
            self.by_id.remove_if(&old.id, |_, e| {
                e.partition == old.partition && e.name == old.name
            });
        }
    }

    /// Caller holds the write guard.
    fn evict_one(&self) {
        // Clone the key first; removing while an iterator holds a shard lock deadlocks.
        let victim = self.by_name.iter().next().map(|e| e.key().clone());
        if let Some((partition, name)) = victim {
            self.unlink_name(&partition, &name);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}
