// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic for transient store failures.
//!
//! Every Redis round-trip in the remote tier goes through [`retry`] with one
//! of the presets: a failed `GET` is retried a couple of times and then
//! degrades to a miss, it never propagates to the caller.
//!
//! # Example
//!
//! ```
//! use tiered_cache::RetryPolicy;
//!
//! // Connecting: exponential backoff, fail fast on bad config
//! let connect = RetryPolicy::connect();
//! assert_eq!(connect.max_attempts, 5);
//!
//! // Per-operation: a few quick attempts, then let the tier degrade
//! let op = RetryPolicy::op();
//! assert_eq!(op.max_attempts, 3);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Attempt count and backoff shape for retried store calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure. 1.0 = fixed delay.
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::op()
    }
}

impl RetryPolicy {
    /// Initial connection: 5 attempts with exponential backoff, done in a
    /// few seconds. Surfaces configuration errors quickly at startup.
    #[must_use]
    pub fn connect() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Individual store operation: 3 attempts with a short fixed delay.
    /// If it still fails the tier absorbs the error and degrades.
    #[must_use]
    pub fn op() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            factor: 1.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Run `operation` until it succeeds or the policy is exhausted, sleeping
/// between attempts. The last error is returned unchanged.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = policy.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(
                        operation = operation_name,
                        attempts, "operation succeeded after retries"
                    );
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= policy.max_attempts {
                    return Err(err);
                }
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max = policy.max_attempts,
                    error = %err,
                    retry_in = ?delay,
                    "operation failed, retrying"
                );
                sleep(delay).await;
                delay = delay.mul_f64(policy.factor).min(policy.max_delay);
            }
        }
    }
}
