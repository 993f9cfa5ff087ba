// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage tiers.
//!
//! - [`redis`]: FastTier backed by Redis (one JSON list per key, `SET EX`)
//! - [`sql`]: DurableTier backed by SQLite or MySQL through sqlx `Any`
//! - [`memory`]: in-process implementations of both tiers

pub mod traits;
pub mod redis;
pub mod sql;
pub mod memory;

pub use traits::{DurableTier, FastTier, StorageError};
