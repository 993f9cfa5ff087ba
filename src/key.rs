// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache key derivation.
//!
//! Keys have the shape `{topic}:{subtopic}:{difficulty}`. Each free-text
//! segment is lower-cased, every run of non-alphanumeric characters becomes a
//! single `_`, and the result is length-capped, so cosmetic variation in
//! subtopic labels ("Circles – Area", "circles area") lands on the same slot.
//! Derivation is pure and byte-stable across processes.

use std::fmt;

use crate::cached_item::Difficulty;

/// Default cap on the normalized subtopic segment.
pub const DEFAULT_SUBTOPIC_MAX_LEN: usize = 50;

/// Cap on the normalized topic segment.
pub const TOPIC_MAX_LEN: usize = 64;

/// Segment used when normalization leaves nothing behind.
const EMPTY_SEGMENT: &str = "general";

/// Normalized identifier for a (topic, subtopic, difficulty) slot.
///
/// # Example
///
/// ```
/// use question_cache::{CacheKey, Difficulty};
///
/// let a = CacheKey::build("gcse-maths", "Circles – Area!", Difficulty::Medium);
/// let b = CacheKey::build("GCSE Maths", "circles area", Difficulty::Medium);
///
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "gcse_maths:circles_area:medium");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    value: String,
    subtopic: String,
    difficulty: Difficulty,
}

impl CacheKey {
    /// Build a key using [`DEFAULT_SUBTOPIC_MAX_LEN`].
    pub fn build(topic_id: &str, subtopic: &str, difficulty: Difficulty) -> Self {
        Self::build_with_limit(topic_id, subtopic, difficulty, DEFAULT_SUBTOPIC_MAX_LEN)
    }

    /// Build a key with an explicit subtopic length cap.
    pub fn build_with_limit(
        topic_id: &str,
        subtopic: &str,
        difficulty: Difficulty,
        subtopic_max_len: usize,
    ) -> Self {
        let topic = normalize_segment(topic_id, TOPIC_MAX_LEN);
        let subtopic = normalize_segment(subtopic, subtopic_max_len.max(1));
        let value = format!("{}:{}:{}", topic, subtopic, difficulty.as_str());
        Self { value, subtopic, difficulty }
    }

    /// Re-hydrate a key previously produced by [`CacheKey::build`].
    ///
    /// Returns `None` if `raw` is not a normalized three-segment key.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(':');
        let (topic, subtopic, difficulty) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        let difficulty = difficulty.parse::<Difficulty>().ok()?;
        let key = Self::build_with_limit(topic, subtopic, difficulty, subtopic.len().max(1));
        (key.value == raw).then_some(key)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The normalized subtopic segment.
    #[must_use]
    pub fn subtopic(&self) -> &str {
        &self.subtopic
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

/// Lower-case, collapse non-alphanumeric runs to `_`, trim and cap.
fn normalize_segment(raw: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_len));
    let mut pending_sep = false;

    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
        if out.len() >= max_len {
            break;
        }
    }

    // Output is pure ASCII, so byte truncation is char-safe.
    out.truncate(max_len);
    while out.ends_with('_') {
        out.pop();
    }

    if out.is_empty() {
        EMPTY_SEGMENT.to_string()
    } else {
        out
    }
}
