// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cached question data structures.
//!
//! A [`CachedItem`] is the unit the producer hands us and the unit a read
//! returns. A [`DurableRow`] is the persisted superset kept by the durable
//! tier, carrying identity, fingerprint and access statistics.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::CacheKey;

/// Current wall-clock time as epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Difficulty tier of a question slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}

/// A generated question as stored in and served from the cache.
///
/// # Example
///
/// ```
/// use question_cache::CachedItem;
///
/// let item = CachedItem::new("Solve 3x+2=11 for x", "x = 3", 2)
///     .with_mark_scheme(vec!["M1 subtract 2".into(), "A1 x = 3".into()]);
///
/// assert_eq!(item.marks, 2);
/// assert_eq!(item.mark_scheme.len(), 2);
/// assert!(item.cached_at > 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedItem {
    /// The question body
    pub content: String,
    /// Worked solution
    pub solution: String,
    /// Point value
    pub marks: u32,
    /// Scoring breakdown, in order
    #[serde(default)]
    pub mark_scheme: Vec<String>,
    /// Auxiliary visual spec (opaque to the cache)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram: Option<Value>,
    /// Insertion timestamp (epoch millis)
    pub cached_at: i64,
}

impl CachedItem {
    /// Create an item stamped with the current time.
    pub fn new(content: impl Into<String>, solution: impl Into<String>, marks: u32) -> Self {
        Self {
            content: content.into(),
            solution: solution.into(),
            marks,
            mark_scheme: Vec::new(),
            diagram: None,
            cached_at: now_millis(),
        }
    }

    #[must_use]
    pub fn with_mark_scheme(mut self, mark_scheme: Vec<String>) -> Self {
        self.mark_scheme = mark_scheme;
        self
    }

    #[must_use]
    pub fn with_diagram(mut self, diagram: Value) -> Self {
        self.diagram = Some(diagram);
        self
    }

    #[must_use]
    pub fn with_cached_at(mut self, cached_at: i64) -> Self {
        self.cached_at = cached_at;
        self
    }

    /// Whether the item is older than `max_age` at time `now` (epoch millis).
    #[must_use]
    pub fn is_expired(&self, now: i64, max_age: Duration) -> bool {
        now.saturating_sub(self.cached_at) > max_age.as_millis() as i64
    }
}

/// Persisted form of a [`CachedItem`] in the durable tier.
///
/// `(cache_key, content_hash)` is unique; inserting a second row with the
/// same pair is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRow {
    pub id: String,
    pub cache_key: String,
    pub subtopic: String,
    pub difficulty: Difficulty,
    pub content: String,
    pub solution: String,
    pub marks: u32,
    pub mark_scheme: Vec<String>,
    pub diagram: Option<Value>,
    /// Exact-duplicate fingerprint (see [`crate::similarity::content_hash`])
    pub content_hash: String,
    /// Epoch millis, mirrors `CachedItem::cached_at`
    pub created_at: i64,
    /// Epoch millis of the last served read
    pub accessed_at: i64,
    pub access_count: u64,
}

impl DurableRow {
    /// Build a fresh row for `item` under `key` with a new unique id.
    pub fn from_item(key: &CacheKey, item: &CachedItem, content_hash: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cache_key: key.as_str().to_string(),
            subtopic: key.subtopic().to_string(),
            difficulty: key.difficulty(),
            content: item.content.clone(),
            solution: item.solution.clone(),
            marks: item.marks,
            mark_scheme: item.mark_scheme.clone(),
            diagram: item.diagram.clone(),
            content_hash,
            created_at: item.cached_at,
            accessed_at: item.cached_at,
            access_count: 0,
        }
    }

    /// Project the row back to the item shape served to callers.
    pub fn to_item(&self) -> CachedItem {
        CachedItem {
            content: self.content.clone(),
            solution: self.solution.clone(),
            marks: self.marks,
            mark_scheme: self.mark_scheme.clone(),
            diagram: self.diagram.clone(),
            cached_at: self.created_at,
        }
    }
}
