//! In-process tier implementations.
//!
//! Used for tests and for single-node deployments that want the cache
//! semantics without Redis or SQL. Semantics match the networked adapters:
//! TTL expiry on the fast tier, `(cache_key, content_hash)` uniqueness and
//! least-used ordering on the durable tier.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::traits::{DurableTier, FastTier, StorageError};
use crate::cached_item::{CachedItem, DurableRow};

struct FastEntry {
    items: Vec<CachedItem>,
    expires_at: Instant,
}

pub struct InMemoryFastTier {
    data: DashMap<String, FastEntry>,
}

impl InMemoryFastTier {
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    /// Number of keys currently held (including not-yet-reaped expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryFastTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FastTier for InMemoryFastTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<CachedItem>>, StorageError> {
        let now = Instant::now();
        if let Some(entry) = self.data.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.items.clone()));
            }
        }
        self.data.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<(), StorageError> {
        self.data.insert(
            key.to_string(),
            FastEntry {
                items: items.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<bool, StorageError> {
        let now = Instant::now();
        let entry = FastEntry {
            items: items.to_vec(),
            expires_at: now + ttl,
        };
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return Ok(false);
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }
}

pub struct InMemoryDurableTier {
    rows: RwLock<HashMap<String, Vec<DurableRow>>>,
}

impl InMemoryDurableTier {
    #[must_use]
    pub fn new() -> Self {
        Self { rows: RwLock::new(HashMap::new()) }
    }

    /// Snapshot of every row stored under `key`, in insertion order.
    #[must_use]
    pub fn rows(&self, key: &str) -> Vec<DurableRow> {
        self.rows.read().get(key).cloned().unwrap_or_default()
    }

    /// Insert a row verbatim, bypassing uniqueness (for seeding tests).
    pub fn insert_raw(&self, row: DurableRow) {
        self.rows.write().entry(row.cache_key.clone()).or_default().push(row);
    }
}

impl Default for InMemoryDurableTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableTier for InMemoryDurableTier {
    async fn query(&self, key: &str, not_before: i64, limit: usize) -> Result<Vec<DurableRow>, StorageError> {
        let mut rows: Vec<DurableRow> = self
            .rows
            .read()
            .get(key)
            .map(|rows| rows.iter().filter(|r| r.created_at >= not_before).cloned().collect())
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            a.access_count
                .cmp(&b.access_count)
                .then(a.accessed_at.cmp(&b.accessed_at))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn upsert(&self, row: &DurableRow) -> Result<bool, StorageError> {
        let mut guard = self.rows.write();
        let rows = guard.entry(row.cache_key.clone()).or_default();
        if rows.iter().any(|r| r.content_hash == row.content_hash) {
            return Ok(false);
        }
        rows.push(row.clone());
        Ok(true)
    }

    async fn prune(&self, key: &str, keep: usize) -> Result<u64, StorageError> {
        let mut guard = self.rows.write();
        let Some(rows) = guard.get_mut(key) else {
            return Ok(0);
        };
        if rows.len() <= keep {
            return Ok(0);
        }
        let excess = rows.len() - keep;
        // Stable sort keeps insertion order among equal access times.
        rows.sort_by_key(|r| r.accessed_at);
        rows.drain(..excess);
        Ok(excess as u64)
    }

    async fn touch(&self, row_id: &str, accessed_at: i64) -> Result<(), StorageError> {
        let mut guard = self.rows.write();
        if let Some(row) = guard.values_mut().flatten().find(|r| r.id == row_id) {
            row.access_count += 1;
            row.accessed_at = accessed_at;
        }
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.rows.write().remove(key).map_or(0, |rows| rows.len() as u64))
    }

    async fn purge_before(&self, cutoff: i64) -> Result<u64, StorageError> {
        let mut guard = self.rows.write();
        let mut removed = 0u64;
        for rows in guard.values_mut() {
            let before = rows.len();
            rows.retain(|r| r.created_at >= cutoff);
            removed += (before - rows.len()) as u64;
        }
        guard.retain(|_, rows| !rows.is_empty());
        Ok(removed)
    }

    async fn count(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.rows.read().get(key).map_or(0, |rows| rows.len() as u64))
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        Ok(self.rows.read().values().map(|rows| rows.len() as u64).sum())
    }
}
