//! Redis storage backend for the fast tier.
//!
//! Each cache key maps to one Redis STRING holding a JSON array of
//! [`CachedItem`]s, most recent first, written with `SET .. EX` so Redis
//! owns expiry:
//!
//! ```text
//! qcache:gcse_maths:circles:easy → [{"content": "...", "cachedAt": 1767084657058, ...}, ...]
//! ```
//!
//! Entries that no longer deserialize (schema drift, manual edits) are
//! dropped one by one; the rest of the list is still served.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::warn;

use super::traits::{FastTier, StorageError};
use crate::cached_item::CachedItem;
use crate::resilience::retry::{retry, RetryConfig};

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct RedisFastTier {
    connection: ConnectionManager,
    /// Key prefix for namespacing (e.g., "qcache:" → "qcache:maths:circles:easy")
    prefix: String,
    retry: RetryConfig,
}

impl RedisFastTier {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str, timeout: Duration) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None, timeout).await
    }

    /// Connect with an optional key prefix.
    ///
    /// `timeout` bounds every individual Redis round trip.
    ///
    /// ```rust,no_run
    /// # use question_cache::storage::redis::RedisFastTier;
    /// # use std::time::Duration;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let tier = RedisFastTier::with_prefix(
    ///     "redis://localhost",
    ///     Some("qcache:"),
    ///     Duration::from_millis(250),
    /// ).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(
        connection_string: &str,
        prefix: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Unavailable(format!("invalid Redis URL: {}", e)))?;

        let connection = retry("redis_connect", &RetryConfig::startup(timeout), || async {
            ConnectionManager::new(client.clone()).await.map_err(backend)
        })
        .await?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            retry: RetryConfig::fast(timeout),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Clone of the underlying connection, for tooling that needs raw access.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Decode a stored list, skipping entries that fail to deserialize.
    pub(crate) fn decode_list(key: &str, raw: &[u8]) -> Result<Vec<CachedItem>, StorageError> {
        let entries: Vec<serde_json::Value> = serde_json::from_slice(raw)
            .map_err(|e| StorageError::Malformed(format!("{}: {}", key, e)))?;

        let total = entries.len();
        let items: Vec<CachedItem> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();

        if items.len() < total {
            warn!(key, skipped = total - items.len(), "Dropped malformed fast-tier entries");
        }
        Ok(items)
    }
}

#[async_trait]
impl FastTier for RedisFastTier {
    async fn get(&self, key: &str) -> Result<Option<Vec<CachedItem>>, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        let raw: Option<Vec<u8>> = retry("redis_get", &self.retry, || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            async move { conn.get(&key).await.map_err(backend) }
        })
        .await?;

        raw.map(|bytes| Self::decode_list(key, &bytes)).transpose()
    }

    async fn set(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<(), StorageError> {
        let data = serde_json::to_vec(items).map_err(|e| StorageError::Backend(e.to_string()))?;
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);
        let ttl_secs = ttl.as_secs().max(1);

        retry("redis_set", &self.retry, || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            let data = data.clone();
            async move {
                let _: () = conn.set_ex(&key, data, ttl_secs).await.map_err(backend)?;
                Ok(())
            }
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, items: &[CachedItem], ttl: Duration) -> Result<bool, StorageError> {
        let data = serde_json::to_vec(items).map_err(|e| StorageError::Backend(e.to_string()))?;
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);
        let ttl_secs = ttl.as_secs().max(1);

        // SET .. NX EX replies OK when stored, nil when the key already exists.
        let reply: Option<String> = retry("redis_set_nx", &self.retry, || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            let data = data.clone();
            async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(data)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async(&mut conn)
                    .await
                    .map_err(backend)
            }
        })
        .await?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        retry("redis_delete", &self.retry, || {
            let mut conn = conn.clone();
            let key = prefixed.clone();
            async move {
                let _: () = conn.del(&key).await.map_err(backend)?;
                Ok(())
            }
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let conn = self.connection.clone();
        retry("redis_ping", &self.retry, || {
            let mut conn = conn.clone();
            async move {
                let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(backend)?;
                Ok(())
            }
        })
        .await
    }
}
