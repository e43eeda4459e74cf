//! Bounded retry with exponential backoff.

use std::time::Duration;

/// Retry policy for connection attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub base: Duration,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_attempts: 3,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay to wait after the failed attempt with zero-based index `attempt`.
    ///
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
