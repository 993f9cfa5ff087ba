// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the question cache.
//!
//! Uses the `metrics` crate facade; the embedding service installs the
//! exporter.
//!
//! # Metric Naming Convention
//! - `question_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: fast, durable
//! - `operation`: read, write, query, upsert, prune, touch, ...
//! - `outcome`: hit, miss, stored, duplicate, near_duplicate, ...

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Record the outcome of a read against one tier
pub fn record_read(tier: &str, outcome: &str) {
    counter!(
        "question_cache_reads_total",
        "tier" => tier.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the outcome of a write
pub fn record_write(outcome: &str) {
    counter!(
        "question_cache_writes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a swallowed tier error
pub fn record_tier_error(tier: &str, operation: &str, kind: &str) {
    counter!(
        "question_cache_tier_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record rows removed by capacity pruning or expiry purge
pub fn record_removed(reason: &str, count: u64) {
    counter!(
        "question_cache_rows_removed_total",
        "reason" => reason.to_string()
    )
    .increment(count);
}

/// Record candidates discarded by read-path filtering
pub fn record_filtered(reason: &str, count: usize) {
    counter!(
        "question_cache_filtered_total",
        "reason" => reason.to_string()
    )
    .increment(count as u64);
}

/// Set the last observed supply for a supply check
pub fn set_supply(count: usize) {
    gauge!("question_cache_last_supply").set(count as f64);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "question_cache_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records latency for `operation` when dropped.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
