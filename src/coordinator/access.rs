//! Fire-and-forget side effects of a durable hit.
//!
//! Neither task is awaited by the read that spawned it; a failure is logged
//! and counted like any other tier failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cached_item::{now_millis, CachedItem, DurableRow};
use crate::config::CacheConfig;
use crate::key::CacheKey;
use crate::metrics;
use crate::storage::traits::{DurableTier, FastTier};

/// Bump `accessed_at` and `access_count` for the served row.
pub(super) fn spawn_touch(durable: Arc<dyn DurableTier>, row_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = durable.touch(&row_id, now_millis()).await {
            warn!(row_id = %row_id, error = %e, "Failed to record access");
            metrics::record_tier_error("durable", "touch", e.kind());
        }
    })
}

/// Items to seed the fast tier with after it missed: newest first, capped.
pub(super) fn promotion_items(rows: &[DurableRow], cap: usize) -> Vec<CachedItem> {
    let mut items: Vec<CachedItem> = rows.iter().map(DurableRow::to_item).collect();
    items.sort_by(|a, b| b.cached_at.cmp(&a.cached_at));
    items.truncate(cap);
    items
}

/// Copy durable rows into the fast tier so the next read stays in memory.
///
/// Only fills a key that is still empty: a write that landed after the
/// durable snapshot was taken holds the fresher list.
pub(super) fn spawn_promotion(
    fast: Arc<dyn FastTier>,
    key: CacheKey,
    rows: &[DurableRow],
    config: &CacheConfig,
) -> JoinHandle<()> {
    let items = promotion_items(rows, config.max_questions_per_key);
    let ttl: Duration = config.fast_tier_ttl();
    tokio::spawn(async move {
        match fast.set_if_absent(key.as_str(), &items, ttl).await {
            Ok(true) => {
                debug!(key = %key, count = items.len(), "Promoted durable rows to fast tier");
                metrics::record_read("fast", "promoted");
            }
            Ok(false) => debug!(key = %key, "Fast tier refilled meanwhile, promotion skipped"),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to promote to fast tier");
                metrics::record_tier_error("fast", "promote", e.kind());
            }
        }
    })
}
