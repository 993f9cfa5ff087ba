// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content fingerprinting and near-duplicate scoring.
//!
//! - [`content_hash`]: 32-bit rolling hash, rendered base-36. Only used as an
//!   exact-duplicate key next to the cache key; collisions are tolerated.
//! - [`similarity`]: Jaccard overlap of long-word token sets, in `[0, 1]`.
//!
//! Both are deliberately cheap and dependency-free so they can run on every
//! read and write.

use std::collections::HashSet;

/// Words must be longer than this (in chars) to count as tokens.
const MIN_TOKEN_CHARS: usize = 3;

/// Deterministic, non-cryptographic hash of `content`.
///
/// # Example
///
/// ```
/// use question_cache::similarity::content_hash;
///
/// assert_eq!(content_hash("abc"), content_hash("abc"));
/// assert_ne!(content_hash("abc"), content_hash("abd"));
/// ```
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hash: i32 = 0;
    for unit in content.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    to_base36(u64::from(hash.unsigned_abs()))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(8);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// First `max_chars` characters of `content` (char-boundary safe).
#[must_use]
pub fn content_prefix(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokens(normalized: &str) -> HashSet<&str> {
    normalized
        .split(' ')
        .filter(|word| word.chars().count() > MIN_TOKEN_CHARS)
        .collect()
}

/// Token-overlap similarity of two texts.
///
/// Identical texts (after whitespace/case normalization) score 1; a text that
/// is empty scores 0 against anything.
///
/// # Example
///
/// ```
/// use question_cache::similarity::similarity;
///
/// let a = "Calculate the area of a circle with radius 5cm";
/// assert_eq!(similarity(a, a), 1.0);
/// assert_eq!(similarity(a, ""), 0.0);
/// assert!(similarity(a, "Solve 3x+2=11 for x") < 0.1);
/// ```
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let (ta, tb) = (tokens(&a), tokens(&b));
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    intersection as f64 / union as f64
}

/// Whether `a` and `b` are near-duplicates at `threshold`.
#[must_use]
pub fn is_near_duplicate(a: &str, b: &str, threshold: f64) -> bool {
    similarity(a, b) >= threshold
}
