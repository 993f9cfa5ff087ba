//! Diversity-biased selection.
//!
//! Picking uniformly over the whole pool lets freshly written questions
//! crowd out the rest of the pool. Instead we pick uniformly among the oldest
//! third by `cached_at` (at least one item), so usage spreads over what is
//! already stored.

use rand::Rng;

use super::types::Candidate;

/// Size of the oldest-third pool for `n` candidates (never 0 when `n > 0`).
pub(super) fn pool_size(n: usize) -> usize {
    (n / 3).max(1).min(n)
}

/// Pick one candidate uniformly from the oldest third.
///
/// Ties on `cached_at` keep their incoming order.
pub(super) fn pick_oldest_third<R: Rng + ?Sized>(mut candidates: Vec<Candidate>, rng: &mut R) -> Option<Candidate> {
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by_key(|c| c.item.cached_at);
    let pool = pool_size(candidates.len());
    let idx = rng.gen_range(0..pool);
    Some(candidates.swap_remove(idx))
}
