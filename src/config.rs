//! Configuration for the question cache.
//!
//! # Example
//!
//! ```
//! use question_cache::CacheConfig;
//!
//! // Defaults: no backends, 20 questions per key, 60-day expiry
//! let config = CacheConfig::default();
//! assert_eq!(config.max_questions_per_key, 20);
//! assert_eq!(config.cache_expiry_days, 60);
//!
//! let config = CacheConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     sql_url: Some("sqlite:questions.db?mode=rwc".into()),
//!     max_questions_per_key: 30,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::Deserialize;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Configuration for the question cache.
///
/// Every field has a default; a config with neither URL set yields a cache
/// that always misses, which is a valid (if slow) deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Redis connection string for the fast tier (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Namespace prepended to every fast-tier key
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: Option<String>,

    /// SQL connection string for the durable tier ("sqlite:..." or "mysql://...")
    #[serde(default)]
    pub sql_url: Option<String>,

    /// Retained items per key after a write-triggered prune
    #[serde(default = "default_max_questions_per_key")]
    pub max_questions_per_key: usize,

    /// Items older than this are never served
    #[serde(default = "default_cache_expiry_days")]
    pub cache_expiry_days: u32,

    /// TTL applied to fast-tier lists on every write
    #[serde(default = "default_fast_tier_ttl_secs")]
    pub fast_tier_ttl_secs: u64,

    /// Similarity at or above which two texts are near-duplicates
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Characters compared by the exact-duplicate and exclusion prefix checks
    #[serde(default = "default_exclusion_prefix_len")]
    pub exclusion_prefix_len: usize,

    /// Supply below this asks the producer for more
    #[serde(default = "default_min_supply_threshold")]
    pub min_supply_threshold: usize,

    /// Cap on the normalized subtopic segment of a key
    #[serde(default = "default_subtopic_max_len")]
    pub subtopic_max_len: usize,

    /// Per-attempt bound on any single tier call
    #[serde(default = "default_tier_timeout_ms")]
    pub tier_timeout_ms: u64,
}

fn default_redis_prefix() -> Option<String> { Some("qcache:".to_string()) }
fn default_max_questions_per_key() -> usize { 20 }
fn default_cache_expiry_days() -> u32 { 60 }
fn default_fast_tier_ttl_secs() -> u64 { 7 * 24 * 60 * 60 } // 7 days
fn default_similarity_threshold() -> f64 { 0.7 }
fn default_exclusion_prefix_len() -> usize { 100 }
fn default_min_supply_threshold() -> usize { 5 }
fn default_subtopic_max_len() -> usize { crate::key::DEFAULT_SUBTOPIC_MAX_LEN }
fn default_tier_timeout_ms() -> u64 { 2_000 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_prefix: default_redis_prefix(),
            sql_url: None,
            max_questions_per_key: default_max_questions_per_key(),
            cache_expiry_days: default_cache_expiry_days(),
            fast_tier_ttl_secs: default_fast_tier_ttl_secs(),
            similarity_threshold: default_similarity_threshold(),
            exclusion_prefix_len: default_exclusion_prefix_len(),
            min_supply_threshold: default_min_supply_threshold(),
            subtopic_max_len: default_subtopic_max_len(),
            tier_timeout_ms: default_tier_timeout_ms(),
        }
    }
}

impl CacheConfig {
    /// Maximum servable age.
    #[must_use]
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.cache_expiry_days as u64 * MILLIS_PER_DAY as u64)
    }

    /// Oldest servable `cached_at` at time `now` (both epoch millis).
    #[must_use]
    pub fn expiry_cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(i64::from(self.cache_expiry_days) * MILLIS_PER_DAY)
    }

    #[must_use]
    pub fn fast_tier_ttl(&self) -> Duration {
        Duration::from_secs(self.fast_tier_ttl_secs)
    }

    #[must_use]
    pub fn tier_timeout(&self) -> Duration {
        Duration::from_millis(self.tier_timeout_ms)
    }
}
