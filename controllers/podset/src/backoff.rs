//! # Exponential Backoff
//!
//! Per-key exponential backoff for requeueing failed reconciles.
//!
//! Each key that fails gets its own failure counter. The delay before the
//! next attempt is `base * 2^failures`, capped at `max`. A successful
//! reconcile forgets the key, so the next failure starts from `base` again.
//!
//! With the defaults (5ms base, 1000s cap): 5ms, 10ms, 20ms, 40ms, ... 1000s.

use crate::key::ResourceKey;
use std::collections::HashMap;
use std::time::Duration;

/// Default delay for the first retry of a key
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default upper bound for any retry delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff calculator
///
/// Stateless: the delay is a pure function of the failure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay for the first failure
    base: Duration,
    /// Cap applied to every delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new backoff with the given base and maximum delays
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Calculate the delay for a given number of previous failures
    ///
    /// `failures` is 0-indexed: the first retry waits `base`.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        // 2^31 * base overflows long before it is useful; saturate at the cap
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

/// Failure tracking per work queue key
#[derive(Debug, Default)]
pub struct RateLimiter {
    backoff: ExponentialBackoff,
    /// Consecutive failures per key (namespace/name -> count)
    failures: HashMap<ResourceKey, u32>,
}

impl RateLimiter {
    /// Create a rate limiter using the given backoff curve
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            backoff,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn when(&mut self, key: &ResourceKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let delay = self.backoff.delay_for(*failures);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Number of times `key` has been requeued since it was last forgotten
    #[must_use]
    pub fn num_requeues(&self, key: &ResourceKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the failure count for `key`
    pub fn forget(&mut self, key: &ResourceKey) {
        self.failures.remove(key);
    }
}
