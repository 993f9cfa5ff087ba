// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cached_item::{CachedItem, DurableRow};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Operation '{operation}' timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },
    #[error("Malformed stored data: {0}")]
    Malformed(String),
    #[error("Tier unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Backend(_) => "backend",
            StorageError::Timeout { .. } => "timeout",
            StorageError::Malformed(_) => "malformed",
            StorageError::Unavailable(_) => "unavailable",
        }
    }
}

/// Volatile, latency-optimized key → list store with per-key TTL.
///
/// Never the source of truth. Implementations bound their own latency and
/// surface timeouts as [`StorageError::Timeout`].
#[async_trait]
pub trait FastTier: Send + Sync {
    /// Fetch the whole list for `key`. `Ok(None)` is a miss.
    ///
    /// Individual malformed entries are dropped; only an unreadable list as
    /// a whole is an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<CachedItem>>, StorageError>;

    /// Replace the list for `key`, expiring it after `ttl`.
    async fn set(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<(), StorageError>;

    /// Store the list only if `key` holds nothing live. Returns `true` if it
    /// was stored. The check and the write are one atomic step.
    async fn set_if_absent(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<bool, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Cheap liveness probe for diagnostics.
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Persistent, queryable row store keyed by cache key.
#[async_trait]
pub trait DurableTier: Send + Sync {
    /// Rows for `key` created at or after `not_before` (epoch millis),
    /// least-used first: ascending `access_count`, then ascending
    /// `accessed_at`. At most `limit` rows.
    async fn query(&self, key: &str, not_before: i64, limit: usize) -> Result<Vec<DurableRow>, StorageError>;

    /// Insert `row` unless `(cache_key, content_hash)` already exists.
    /// Returns `true` if a row was inserted.
    async fn upsert(&self, row: &DurableRow) -> Result<bool, StorageError>;

    /// Delete the least-recently-accessed rows of `key` beyond `keep`.
    /// Returns the number of rows removed.
    async fn prune(&self, key: &str, keep: usize) -> Result<u64, StorageError>;

    /// Increment `access_count` and set `accessed_at` for one row.
    async fn touch(&self, row_id: &str, accessed_at: i64) -> Result<(), StorageError>;

    /// Remove every row of `key`. Returns the number of rows removed.
    async fn delete_key(&self, key: &str) -> Result<u64, StorageError>;

    /// Remove rows created before `cutoff` (epoch millis), across all keys.
    async fn purge_before(&self, cutoff: i64) -> Result<u64, StorageError>;

    /// Row count for one key, regardless of age.
    async fn count(&self, key: &str) -> Result<u64, StorageError>;

    /// Row count across all keys.
    async fn count_all(&self) -> Result<u64, StorageError>;

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
