//! Write path: duplicate gating, then independent writes to each tier.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::cached_item::{now_millis, CachedItem, DurableRow};
use crate::key::CacheKey;
use crate::metrics::{self, LatencyTimer};
use crate::similarity::{content_hash, content_prefix, similarity};

use super::types::WriteOutcome;
use super::QuestionCache;

/// Why an item was refused before touching any tier.
fn duplicate_of(
    item: &CachedItem,
    hash: &str,
    existing: &[CachedItem],
    prefix_len: usize,
    threshold: f64,
) -> Option<WriteOutcome> {
    let prefix = content_prefix(&item.content, prefix_len);
    for other in existing {
        if content_prefix(&other.content, prefix_len) == prefix || content_hash(&other.content) == hash {
            return Some(WriteOutcome::DuplicateContent);
        }
        let score = similarity(&item.content, &other.content);
        if score >= threshold {
            debug!(score, "Rejecting near-duplicate");
            return Some(WriteOutcome::NearDuplicate);
        }
    }
    None
}

impl QuestionCache {
    /// Offer a freshly produced item for `key`.
    ///
    /// `cached_at` is stamped with the current time. The item is refused if
    /// the key already holds one with the same content prefix or a similar
    /// enough text. Otherwise it is written through to both tiers
    /// independently; a failing tier does not undo the other.
    #[tracing::instrument(skip(self, key, item), fields(key = %key))]
    pub async fn write(&self, key: &CacheKey, mut item: CachedItem) -> WriteOutcome {
        let _timer = LatencyTimer::new("write");
        if self.fast.is_none() && self.durable.is_none() {
            metrics::record_write(WriteOutcome::NotStored.as_str());
            return WriteOutcome::NotStored;
        }

        let now = now_millis();
        item.cached_at = now;
        let hash = content_hash(&item.content);
        let existing = self.working_set(key, now).await;

        if let Some(rejected) = duplicate_of(
            &item,
            &hash,
            &existing,
            self.config.exclusion_prefix_len,
            self.config.similarity_threshold,
        ) {
            debug!(outcome = %rejected, held = existing.len(), "Write refused");
            metrics::record_write(rejected.as_str());
            return rejected;
        }

        let fast_stored = self.write_fast(key, &item, existing).await;
        let durable_inserted = self.write_durable(key, &item, hash).await;

        let outcome = match (fast_stored, durable_inserted) {
            (true, _) | (_, Some(true)) => WriteOutcome::Stored,
            (false, Some(false)) => WriteOutcome::DuplicateContent,
            (false, None) => WriteOutcome::NotStored,
        };
        metrics::record_write(outcome.as_str());
        outcome
    }

    /// Unexpired items currently held for `key` in either tier, newest first.
    ///
    /// The fast list can miss items whose fast write failed or was
    /// overwritten, so durable rows are merged in; content seen in both
    /// tiers appears once.
    async fn working_set(&self, key: &CacheKey, now: i64) -> Vec<CachedItem> {
        let max_age = self.config.expiry();
        let (fast, durable) = tokio::join!(self.fast_items(key), self.durable_rows(key, now));

        let mut seen = HashSet::new();
        let mut items: Vec<CachedItem> = fast
            .unwrap_or_default()
            .into_iter()
            .chain(durable.unwrap_or_default().iter().map(DurableRow::to_item))
            .filter(|i| !i.is_expired(now, max_age))
            .filter(|i| seen.insert(content_hash(&i.content)))
            .collect();
        items.sort_by(|a, b| b.cached_at.cmp(&a.cached_at));
        items
    }

    async fn write_fast(&self, key: &CacheKey, item: &CachedItem, existing: Vec<CachedItem>) -> bool {
        let Some(fast) = &self.fast else {
            return false;
        };
        let mut list = Vec::with_capacity(existing.len() + 1);
        list.push(item.clone());
        list.extend(existing);
        list.truncate(self.config.max_questions_per_key);

        match fast.set(key.as_str(), &list, self.config.fast_tier_ttl()).await {
            Ok(()) => true,
            Err(e) => {
                self.tier_failed("fast", "set", &e);
                false
            }
        }
    }

    /// `Some(inserted)` when the durable tier answered, `None` otherwise.
    async fn write_durable(&self, key: &CacheKey, item: &CachedItem, hash: String) -> Option<bool> {
        let durable = self.durable.as_ref()?;
        let row = DurableRow::from_item(key, item, hash);

        let inserted = match durable.upsert(&row).await {
            Ok(inserted) => inserted,
            Err(e) => {
                self.tier_failed("durable", "upsert", &e);
                return None;
            }
        };
        if !inserted {
            debug!("Durable tier already holds this content");
        }

        match durable.prune(key.as_str(), self.config.max_questions_per_key).await {
            Ok(0) => {}
            Ok(removed) => {
                info!(removed, "Pruned rows over capacity");
                metrics::record_removed("prune", removed);
            }
            Err(e) => self.tier_failed("durable", "prune", &e),
        }
        Some(inserted)
    }
}
