//! Supply checks: does a key hold enough servable items?
//!
//! The producer calls these to decide whether to generate ahead of demand.

use tracing::debug;

use crate::cached_item::now_millis;
use crate::key::CacheKey;
use crate::metrics;

use super::read::{from_items, from_rows, ReadFilter};
use super::QuestionCache;

impl QuestionCache {
    /// Number of unexpired items for `key` that `exclusions` would not filter out.
    ///
    /// Counts the fast tier when it has any usable item, otherwise the durable
    /// tier. Unavailable tiers count as empty.
    #[tracing::instrument(skip(self, key, exclusions), fields(key = %key))]
    pub async fn supply(&self, key: &CacheKey, exclusions: &[String]) -> usize {
        let now = now_millis();
        let filter = ReadFilter::new(&self.config, exclusions, now);

        let fast_count = match self.fast_items(key).await {
            Some(items) => filter.apply(from_items(items)).len(),
            None => 0,
        };
        let count = if fast_count > 0 {
            fast_count
        } else {
            match self.durable_rows(key, now).await {
                Some(rows) => filter.apply(from_rows(&rows)).len(),
                None => 0,
            }
        };

        debug!(count, "Supply checked");
        metrics::set_supply(count);
        count
    }

    /// Whether `key` holds fewer than `min_threshold` servable items.
    ///
    /// `None` uses the configured `min_supply_threshold`.
    pub async fn needs_more(&self, key: &CacheKey, min_threshold: Option<usize>) -> bool {
        self.needs_more_excluding(key, &[], min_threshold).await
    }

    /// [`needs_more`](Self::needs_more) for a caller who has already seen `exclusions`.
    pub async fn needs_more_excluding(
        &self,
        key: &CacheKey,
        exclusions: &[String],
        min_threshold: Option<usize>,
    ) -> bool {
        let threshold = min_threshold.unwrap_or(self.config.min_supply_threshold);
        self.supply(key, exclusions).await < threshold
    }
}
