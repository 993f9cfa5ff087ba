//! Read path: filter candidates, pick one, fall through tiers.

use std::time::Duration;

use tracing::debug;

use crate::cached_item::{now_millis, CachedItem, Difficulty, DurableRow};
use crate::config::CacheConfig;
use crate::key::CacheKey;
use crate::metrics::{self, LatencyTimer};
use crate::similarity::{content_prefix, is_near_duplicate};

use super::access;
use super::select::pick_oldest_third;
use super::types::{Candidate, Source};
use super::QuestionCache;

/// Drops candidates that are expired or resemble something the caller has
/// already shown.
pub(super) struct ReadFilter<'a> {
    exclusions: Vec<&'a str>,
    now: i64,
    max_age: Duration,
    prefix_len: usize,
    threshold: f64,
}

impl<'a> ReadFilter<'a> {
    pub(super) fn new(config: &CacheConfig, exclusions: &'a [String], now: i64) -> Self {
        Self {
            exclusions: exclusions
                .iter()
                .map(String::as_str)
                .filter(|ex| !ex.trim().is_empty())
                .collect(),
            now,
            max_age: config.expiry(),
            prefix_len: config.exclusion_prefix_len,
            threshold: config.similarity_threshold,
        }
    }

    pub(super) fn is_excluded(&self, content: &str) -> bool {
        let prefix = content_prefix(content, self.prefix_len);
        let truncated = prefix.len() < content.len();

        self.exclusions.iter().any(|ex| {
            let ex_prefix = content_prefix(ex, self.prefix_len);
            prefix == ex_prefix
                || content.starts_with(ex_prefix)
                || is_near_duplicate(content, ex, self.threshold)
                || (truncated && is_near_duplicate(prefix, ex, self.threshold))
        })
    }

    /// Keep only servable candidates, preserving order.
    pub(super) fn apply(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let total = candidates.len();
        let mut expired = 0usize;
        let kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                if c.item.is_expired(self.now, self.max_age) {
                    expired += 1;
                    false
                } else {
                    !self.is_excluded(&c.item.content)
                }
            })
            .collect();

        if expired > 0 {
            metrics::record_filtered("expired", expired);
        }
        let excluded = total - kept.len() - expired;
        if excluded > 0 {
            metrics::record_filtered("excluded", excluded);
        }
        kept
    }
}

pub(super) fn from_items(items: Vec<CachedItem>) -> Vec<Candidate> {
    items.into_iter().map(|item| Candidate { item, row_id: None }).collect()
}

pub(super) fn from_rows(rows: &[DurableRow]) -> Vec<Candidate> {
    rows.iter()
        .map(|row| Candidate {
            item: row.to_item(),
            row_id: Some(row.id.clone()),
        })
        .collect()
}

impl QuestionCache {
    /// Serve a cached question for `key`, or `None` if the producer should run.
    ///
    /// `exclusions` are content prefixes (or whole short texts) already shown
    /// to this caller; nothing matching or closely resembling them is returned.
    #[tracing::instrument(skip(self, key, exclusions), fields(key = %key, exclusions = exclusions.len()))]
    pub async fn read(&self, key: &CacheKey, exclusions: &[String]) -> Option<CachedItem> {
        let _timer = LatencyTimer::new("read");
        let now = now_millis();
        let filter = ReadFilter::new(&self.config, exclusions, now);

        let fast_items = self.fast_items(key).await;
        let fast_missed = fast_items.is_none();
        if let Some(items) = fast_items {
            if let Some(hit) = self.pick(&filter, from_items(items), Source::Fast) {
                return Some(hit.item);
            }
        }

        let rows = self.durable_rows(key, now).await?;
        if fast_missed && !rows.is_empty() {
            if let Some(fast) = &self.fast {
                let _ = access::spawn_promotion(fast.clone(), key.clone(), &rows, &self.config);
            }
        }

        let hit = self.pick(&filter, from_rows(&rows), Source::Durable)?;
        if let (Some(durable), Some(row_id)) = (&self.durable, hit.row_id.clone()) {
            let _ = access::spawn_touch(durable.clone(), row_id);
        }
        Some(hit.item)
    }

    /// Build the key for `(topic_id, subtopic, difficulty)` and [`read`](Self::read) it.
    pub async fn read_for(
        &self,
        topic_id: &str,
        subtopic: &str,
        difficulty: Difficulty,
        exclusions: &[String],
    ) -> Option<CachedItem> {
        let key = self.key(topic_id, subtopic, difficulty);
        self.read(&key, exclusions).await
    }

    fn pick(&self, filter: &ReadFilter<'_>, candidates: Vec<Candidate>, source: Source) -> Option<Candidate> {
        let offered = candidates.len();
        let usable = filter.apply(candidates);
        let remaining = usable.len();
        let picked = pick_oldest_third(usable, &mut rand::thread_rng());

        match &picked {
            Some(_) => {
                debug!(tier = source.as_str(), offered, usable = remaining, "Cache hit");
                metrics::record_read(source.as_str(), "hit");
            }
            None => {
                debug!(tier = source.as_str(), offered, "No usable candidates");
                metrics::record_read(source.as_str(), if offered == 0 { "miss" } else { "filtered" });
            }
        }
        picked
    }
}
