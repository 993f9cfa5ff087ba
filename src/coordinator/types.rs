//! Public types for the cache coordinator.

/// What a write did with the offered item.
///
/// None of these are errors: a rejected or unpersisted item only means the
/// producer may be asked again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written to at least one tier
    Stored,
    /// An item with the same content prefix is already held for the key
    DuplicateContent,
    /// An item too similar to this one is already held for the key
    NearDuplicate,
    /// No tier accepted the write (absent or failing backends)
    NotStored,
}

impl WriteOutcome {
    /// Metrics label
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::DuplicateContent => "duplicate",
            Self::NearDuplicate => "near_duplicate",
            Self::NotStored => "not_stored",
        }
    }

    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored)
    }
}

impl std::fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic snapshot returned by [`super::QuestionCache::stats()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Fast tier configured and answering pings
    pub fast_tier_available: bool,
    /// Durable tier configured and answering pings
    pub durable_tier_available: bool,
    /// Durable rows across all keys, including expired rows not yet purged
    pub approximate_row_count: u64,
}

/// Which tier served a candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Source {
    Fast,
    Durable,
}

impl Source {
    pub(super) fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Durable => "durable",
        }
    }
}

/// A servable item plus the durable row it came from, if any.
#[derive(Debug, Clone)]
pub(super) struct Candidate {
    pub item: crate::cached_item::CachedItem,
    pub row_id: Option<String>,
}
