// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Question cache coordinator.
//!
//! [`QuestionCache`] composes the two tiers:
//! - **Fast tier** (Redis): one TTL'd list per key, tried first on reads
//! - **Durable tier** (SQLite/MySQL): one row per question, source of truth
//!
//! # Read path
//!
//! ```text
//! read(key, exclusions)
//!   → fast.get → drop expired/excluded → pick from oldest third → hit
//!   → durable.query → drop expired/excluded → pick from oldest third → hit
//!                                           └─ spawn touch(row), spawn promote → fast
//!   → miss (caller runs the producer, then write())
//! ```
//!
//! # Write path
//!
//! ```text
//! write(key, item) → working set → exact-prefix guard → similarity guard
//!   → fast.set([item, ..existing][..cap])
//!   → durable.upsert(row) → durable.prune(key, cap)
//! ```
//!
//! Tier failures are logged and counted, never returned: the only thing a
//! caller branches on is "item found" versus "not found".
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use question_cache::{CacheConfig, CachedItem, Difficulty, QuestionCache, WriteOutcome};
//! use question_cache::storage::memory::{InMemoryDurableTier, InMemoryFastTier};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = QuestionCache::new(
//!     CacheConfig::default(),
//!     Some(Arc::new(InMemoryFastTier::new())),
//!     Some(Arc::new(InMemoryDurableTier::new())),
//! );
//! let key = cache.key("gcse-maths", "Linear equations", Difficulty::Easy);
//!
//! assert!(cache.read(&key, &[]).await.is_none());
//! let outcome = cache.write(&key, CachedItem::new("Solve 3x+2=11 for x", "x = 3", 2)).await;
//! assert_eq!(outcome, WriteOutcome::Stored);
//! assert!(cache.read(&key, &[]).await.is_some());
//! # }
//! ```

mod types;
mod access;
mod read;
mod select;
mod supply;
mod write;


pub use types::{CacheStats, WriteOutcome};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cached_item::{now_millis, CachedItem, Difficulty, DurableRow};
use crate::config::CacheConfig;
use crate::key::CacheKey;
use crate::metrics;
use crate::storage::redis::RedisFastTier;
use crate::storage::sql::SqlDurableTier;
use crate::storage::traits::{DurableTier, FastTier, StorageError};

/// Two-tier cache for generated questions.
///
/// Cheap to share behind an `Arc`; every method takes `&self` and there is
/// no in-process locking. Concurrent writers may race past the duplicate
/// guards; the durable tier's uniqueness constraint and the post-write prune
/// bound the damage.
pub struct QuestionCache {
    pub(super) config: CacheConfig,
    pub(super) fast: Option<Arc<dyn FastTier>>,
    pub(super) durable: Option<Arc<dyn DurableTier>>,
}

impl QuestionCache {
    /// Compose a cache from already-constructed tiers.
    ///
    /// `None` for a tier means that tier always misses.
    pub fn new(
        config: CacheConfig,
        fast: Option<Arc<dyn FastTier>>,
        durable: Option<Arc<dyn DurableTier>>,
    ) -> Self {
        Self { config, fast, durable }
    }

    /// Build tiers from the configured URLs.
    ///
    /// A tier whose URL is unset or whose connection fails is left out; this
    /// never fails.
    #[tracing::instrument(skip(config), fields(has_redis = tracing::field::Empty, has_sql = tracing::field::Empty))]
    pub async fn connect(config: CacheConfig) -> Self {
        let timeout = config.tier_timeout();

        let fast: Option<Arc<dyn FastTier>> = match config.redis_url.as_deref() {
            Some(url) => match RedisFastTier::with_prefix(url, config.redis_prefix.as_deref(), timeout).await {
                Ok(tier) => {
                    info!(prefix = ?config.redis_prefix, "Fast tier (Redis) connected");
                    Some(Arc::new(tier))
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to Redis, continuing without fast tier");
                    metrics::record_tier_error("fast", "connect", e.kind());
                    None
                }
            },
            None => {
                info!("No Redis URL configured - fast tier disabled");
                None
            }
        };
        tracing::Span::current().record("has_redis", fast.is_some());

        let durable: Option<Arc<dyn DurableTier>> = match config.sql_url.as_deref() {
            Some(url) => match SqlDurableTier::new(url, timeout).await {
                Ok(tier) => {
                    info!("Durable tier (SQL) connected");
                    Some(Arc::new(tier))
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to SQL, continuing without durable tier");
                    metrics::record_tier_error("durable", "connect", e.kind());
                    None
                }
            },
            None => {
                info!("No SQL URL configured - durable tier disabled");
                None
            }
        };
        tracing::Span::current().record("has_sql", durable.is_some());

        Self::new(config, fast, durable)
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Derive the key for a slot using the configured subtopic cap.
    #[must_use]
    pub fn key(&self, topic_id: &str, subtopic: &str, difficulty: Difficulty) -> CacheKey {
        CacheKey::build_with_limit(topic_id, subtopic, difficulty, self.config.subtopic_max_len)
    }

    #[must_use]
    pub fn has_fast_tier(&self) -> bool {
        self.fast.is_some()
    }

    #[must_use]
    pub fn has_durable_tier(&self) -> bool {
        self.durable.is_some()
    }

    /// Probe both tiers and count durable rows.
    pub async fn stats(&self) -> CacheStats {
        let fast_probe = async {
            match &self.fast {
                Some(fast) => fast.ping().await.map_err(|e| self.tier_failed("fast", "ping", &e)).is_ok(),
                None => false,
            }
        };
        let durable_probe = async {
            match &self.durable {
                Some(durable) => durable.count_all().await.map_err(|e| self.tier_failed("durable", "count", &e)).ok(),
                None => None,
            }
        };
        let (fast_tier_available, row_count) = tokio::join!(fast_probe, durable_probe);

        CacheStats {
            fast_tier_available,
            durable_tier_available: row_count.is_some(),
            approximate_row_count: row_count.unwrap_or(0),
        }
    }

    /// Drop everything held for `key` in both tiers.
    ///
    /// Returns the number of durable rows removed.
    #[tracing::instrument(skip(self, key), fields(key = %key))]
    pub async fn clear(&self, key: &CacheKey) -> u64 {
        if let Some(fast) = &self.fast {
            if let Err(e) = fast.delete(key.as_str()).await {
                self.tier_failed("fast", "delete", &e);
            }
        }
        let removed = match &self.durable {
            Some(durable) => durable
                .delete_key(key.as_str())
                .await
                .unwrap_or_else(|e| {
                    self.tier_failed("durable", "delete", &e);
                    0
                }),
            None => 0,
        };
        info!(removed, "Cleared cache key");
        removed
    }

    /// Delete durable rows older than the expiry window.
    ///
    /// Expired rows are never served anyway; this only reclaims space.
    pub async fn purge_expired(&self) -> u64 {
        let Some(durable) = &self.durable else {
            return 0;
        };
        let cutoff = self.config.expiry_cutoff(now_millis());
        match durable.purge_before(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "Purged expired durable rows");
                    metrics::record_removed("expired", removed);
                }
                removed
            }
            Err(e) => {
                self.tier_failed("durable", "purge", &e);
                0
            }
        }
    }

    /// Fast-tier list for `key`; `None` on miss, absence or failure.
    pub(super) async fn fast_items(&self, key: &CacheKey) -> Option<Vec<CachedItem>> {
        let fast = self.fast.as_ref()?;
        match fast.get(key.as_str()).await {
            Ok(Some(items)) => Some(items),
            Ok(None) => {
                debug!(key = %key, "Fast tier miss");
                None
            }
            Err(e) => {
                self.tier_failed("fast", "get", &e);
                None
            }
        }
    }

    /// Unexpired durable rows for `key`, least-used first; `None` on absence or failure.
    pub(super) async fn durable_rows(&self, key: &CacheKey, now: i64) -> Option<Vec<DurableRow>> {
        let durable = self.durable.as_ref()?;
        let not_before = self.config.expiry_cutoff(now);
        match durable.query(key.as_str(), not_before, self.config.max_questions_per_key).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                self.tier_failed("durable", "query", &e);
                None
            }
        }
    }

    pub(super) fn tier_failed(&self, tier: &'static str, operation: &'static str, error: &StorageError) {
        warn!(tier, operation, error = %error, "Cache tier call failed, treating as miss");
        metrics::record_tier_error(tier, operation, error.kind());
    }
}
