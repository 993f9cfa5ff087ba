// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with per-attempt timeouts.
//!
//! Tier adapters own their latency budget: every attempt is wrapped in a
//! timeout, and an attempt that overruns becomes [`StorageError::Timeout`]
//! instead of stalling the caller.
//!
//! # Example
//!
//! ```
//! use question_cache::RetryConfig;
//! use std::time::Duration;
//!
//! let fast = RetryConfig::fast(Duration::from_millis(250));
//! assert_eq!(fast.max_attempts, 1);
//!
//! let query = RetryConfig::query(Duration::from_secs(2));
//! assert_eq!(query.max_attempts, 2);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::storage::traits::StorageError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first (at least 1).
    pub max_attempts: usize,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryConfig {
    /// Connection setup: a few attempts, so a misconfigured URL fails within seconds.
    #[must_use]
    pub fn startup(attempt_timeout: Duration) -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: 3,
            attempt_timeout,
        }
    }

    /// Durable-tier statements: one quick retry, then give up.
    #[must_use]
    pub fn query(attempt_timeout: Duration) -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
            max_attempts: 2,
            attempt_timeout,
        }
    }

    /// Fast-tier calls: a single attempt. A slow cache is a miss.
    #[must_use]
    pub fn fast(attempt_timeout: Duration) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
            max_attempts: 1,
            attempt_timeout,
        }
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent.
pub async fn retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match timeout(config.attempt_timeout, operation()).await {
            Ok(Ok(val)) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(val);
            }
            Ok(Err(e)) => e,
            Err(_) => StorageError::Timeout {
                operation: operation_name.to_string(),
                after: config.attempt_timeout,
            },
        };

        if attempt >= max_attempts {
            return Err(err);
        }

        warn!(
            operation = operation_name,
            attempt,
            max_attempts,
            error = %err,
            "Storage operation failed, retrying in {:?}",
            delay
        );
        sleep(delay).await;
        delay = delay.mul_f64(config.factor).min(config.max_delay);
    }
}
