// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for the durable tier.
//!
//! One row per cached question:
//! ```sql
//! CREATE TABLE question_cache (
//!   id VARCHAR(36) PRIMARY KEY,
//!   cache_key VARCHAR(255) NOT NULL,   -- indexed
//!   subtopic VARCHAR(255) NOT NULL,
//!   difficulty VARCHAR(16) NOT NULL,
//!   content LONGTEXT NOT NULL,
//!   solution LONGTEXT NOT NULL,
//!   marks BIGINT NOT NULL,
//!   mark_scheme LONGTEXT NOT NULL,     -- JSON array of strings
//!   diagram LONGTEXT NULL,             -- JSON blob
//!   content_hash VARCHAR(16) NOT NULL,
//!   created_at BIGINT NOT NULL,        -- epoch millis
//!   accessed_at BIGINT NOT NULL,       -- epoch millis
//!   access_count BIGINT NOT NULL,
//!   UNIQUE (cache_key, content_hash)
//! )
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! JSON columns are TEXT, and text is read as `String` first and then as
//! bytes, because the `Any` driver hands MySQL LONGTEXT back as a BLOB.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::warn;

use super::traits::{DurableTier, StorageError};
use crate::cached_item::{Difficulty, DurableRow};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

const ROW_COLUMNS: &str = "id, cache_key, subtopic, difficulty, content, solution, marks, \
     mark_scheme, diagram, content_hash, created_at, accessed_at, access_count";

pub struct SqlDurableTier {
    pool: AnyPool,
    is_sqlite: bool,
    retry: RetryConfig,
}

impl SqlDurableTier {
    /// Connect and create the schema if missing.
    ///
    /// `timeout` bounds each statement; a statement that overruns counts as
    /// a failed attempt.
    pub async fn new(connection_string: &str, timeout: Duration) -> Result<Self, StorageError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");
        // SQLite serializes writers anyway; a small pool avoids SQLITE_BUSY churn.
        let max_connections = if is_sqlite { 4 } else { 10 };

        let pool = retry("sql_connect", &RetryConfig::startup(timeout), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(timeout)
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let tier = Self {
            pool,
            is_sqlite,
            retry: RetryConfig::query(timeout),
        };

        if is_sqlite {
            tier.enable_wal_mode().await?;
        }
        tier.init_schema(timeout).await?;
        Ok(tier)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;
        Ok(())
    }

    async fn init_schema(&self, timeout: Duration) -> Result<(), StorageError> {
        let statements: &[&str] = if self.is_sqlite {
            &[
                r#"
                CREATE TABLE IF NOT EXISTS question_cache (
                    id TEXT PRIMARY KEY,
                    cache_key TEXT NOT NULL,
                    subtopic TEXT NOT NULL,
                    difficulty TEXT NOT NULL,
                    content TEXT NOT NULL,
                    solution TEXT NOT NULL,
                    marks INTEGER NOT NULL DEFAULT 0,
                    mark_scheme TEXT NOT NULL,
                    diagram TEXT,
                    content_hash TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    accessed_at INTEGER NOT NULL,
                    access_count INTEGER NOT NULL DEFAULT 0,
                    UNIQUE (cache_key, content_hash)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_question_cache_key ON question_cache (cache_key)",
            ]
        } else {
            &[r#"
                CREATE TABLE IF NOT EXISTS question_cache (
                    id VARCHAR(36) PRIMARY KEY,
                    cache_key VARCHAR(255) NOT NULL,
                    subtopic VARCHAR(255) NOT NULL,
                    difficulty VARCHAR(16) NOT NULL,
                    content LONGTEXT NOT NULL,
                    solution LONGTEXT NOT NULL,
                    marks BIGINT NOT NULL DEFAULT 0,
                    mark_scheme LONGTEXT NOT NULL,
                    diagram LONGTEXT NULL,
                    content_hash VARCHAR(16) NOT NULL,
                    created_at BIGINT NOT NULL,
                    accessed_at BIGINT NOT NULL,
                    access_count BIGINT NOT NULL DEFAULT 0,
                    UNIQUE KEY uq_key_hash (cache_key, content_hash),
                    INDEX idx_cache_key (cache_key),
                    INDEX idx_created_at (created_at)
                )
                "#]
        };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(timeout), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(backend)?;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    /// Read a text column as String, falling back to bytes (MySQL LONGTEXT).
    fn text(row: &AnyRow, column: &str) -> Option<String> {
        row.try_get::<String, _>(column).ok().or_else(|| {
            row.try_get::<Vec<u8>, _>(column)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    fn decode_row(row: &AnyRow) -> Result<DurableRow, StorageError> {
        let required = |column: &str| {
            Self::text(row, column)
                .ok_or_else(|| StorageError::Malformed(format!("missing column '{}'", column)))
        };

        let id = required("id")?;
        let difficulty = required("difficulty")?
            .parse::<Difficulty>()
            .map_err(StorageError::Malformed)?;
        let mark_scheme: Vec<String> = serde_json::from_str(&required("mark_scheme")?)
            .map_err(|e| StorageError::Malformed(format!("{}: mark_scheme: {}", id, e)))?;
        let diagram = match Self::text(row, "diagram") {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| StorageError::Malformed(format!("{}: diagram: {}", id, e)))?,
            ),
            None => None,
        };
        let int = |column: &str| row.try_get::<i64, _>(column).map_err(|e| StorageError::Malformed(e.to_string()));

        Ok(DurableRow {
            cache_key: required("cache_key")?,
            subtopic: required("subtopic")?,
            difficulty,
            content: required("content")?,
            solution: required("solution")?,
            marks: int("marks")?.clamp(0, i64::from(u32::MAX)) as u32,
            mark_scheme,
            diagram,
            content_hash: required("content_hash")?,
            created_at: int("created_at")?,
            accessed_at: int("accessed_at")?,
            access_count: int("access_count")?.max(0) as u64,
            id,
        })
    }

    async fn count_where_key(&self, key: &str) -> Result<i64, StorageError> {
        retry("sql_count_key", &self.retry, || async {
            let row = sqlx::query("SELECT COUNT(*) AS cnt FROM question_cache WHERE cache_key = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
            row.try_get::<i64, _>("cnt").map_err(backend)
        })
        .await
    }
}

#[async_trait]
impl DurableTier for SqlDurableTier {
    async fn query(&self, key: &str, not_before: i64, limit: usize) -> Result<Vec<DurableRow>, StorageError> {
        let sql = format!(
            "SELECT {} FROM question_cache WHERE cache_key = ? AND created_at >= ? \
             ORDER BY access_count ASC, accessed_at ASC LIMIT ?",
            ROW_COLUMNS
        );

        let rows = retry("sql_query", &self.retry, || async {
            sqlx::query(&sql)
                .bind(key)
                .bind(not_before)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)
        })
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match Self::decode_row(row) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(key, error = %e, "Skipping malformed durable row");
                    None
                }
            })
            .collect())
    }

    async fn upsert(&self, row: &DurableRow) -> Result<bool, StorageError> {
        let mark_scheme = serde_json::to_string(&row.mark_scheme).map_err(|e| StorageError::Backend(e.to_string()))?;
        let diagram = row
            .diagram
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let sql = if self.is_sqlite {
            format!(
                "INSERT INTO question_cache ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(cache_key, content_hash) DO NOTHING",
                ROW_COLUMNS
            )
        } else {
            format!(
                "INSERT IGNORE INTO question_cache ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ROW_COLUMNS
            )
        };

        let affected = retry("sql_upsert", &self.retry, || async {
            let result = sqlx::query(&sql)
                .bind(&row.id)
                .bind(&row.cache_key)
                .bind(&row.subtopic)
                .bind(row.difficulty.as_str())
                .bind(&row.content)
                .bind(&row.solution)
                .bind(i64::from(row.marks))
                .bind(&mark_scheme)
                .bind(&diagram)
                .bind(&row.content_hash)
                .bind(row.created_at)
                .bind(row.accessed_at)
                .bind(row.access_count as i64)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(result.rows_affected())
        })
        .await?;

        Ok(affected > 0)
    }

    async fn prune(&self, key: &str, keep: usize) -> Result<u64, StorageError> {
        let total = self.count_where_key(key).await?;
        let excess = total - keep as i64;
        if excess <= 0 {
            return Ok(0);
        }

        // MySQL rejects LIMIT inside IN subqueries, so select victims first.
        let victims: Vec<String> = retry("sql_prune_select", &self.retry, || async {
            let rows = sqlx::query(
                "SELECT id FROM question_cache WHERE cache_key = ? \
                 ORDER BY accessed_at ASC, created_at ASC LIMIT ?",
            )
            .bind(key)
            .bind(excess)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
            Ok(rows.iter().filter_map(|row| Self::text(row, "id")).collect())
        })
        .await?;

        if victims.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; victims.len()].join(", ");
        let sql = format!("DELETE FROM question_cache WHERE id IN ({})", placeholders);

        retry("sql_prune_delete", &self.retry, || async {
            let mut query = sqlx::query(&sql);
            for id in &victims {
                query = query.bind(id);
            }
            let result = query.execute(&self.pool).await.map_err(backend)?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn touch(&self, row_id: &str, accessed_at: i64) -> Result<(), StorageError> {
        retry("sql_touch", &self.retry, || async {
            sqlx::query(
                "UPDATE question_cache SET access_count = access_count + 1, accessed_at = ? WHERE id = ?",
            )
            .bind(accessed_at)
            .bind(row_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn delete_key(&self, key: &str) -> Result<u64, StorageError> {
        retry("sql_delete_key", &self.retry, || async {
            let result = sqlx::query("DELETE FROM question_cache WHERE cache_key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn purge_before(&self, cutoff: i64) -> Result<u64, StorageError> {
        retry("sql_purge", &self.retry, || async {
            let result = sqlx::query("DELETE FROM question_cache WHERE created_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn count(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.count_where_key(key).await?.max(0) as u64)
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        retry("sql_count_all", &self.retry, || async {
            let row = sqlx::query("SELECT COUNT(*) AS cnt FROM question_cache")
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
            let count: i64 = row.try_get("cnt").map_err(backend)?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        retry("sql_ping", &self.retry, || async {
            sqlx::query("SELECT 1").execute(&self.pool).await.map_err(backend)?;
            Ok(())
        })
        .await
    }
}
