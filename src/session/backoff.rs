//! Reconnect backoff policy
//!
//! Fixed short delay while failures are few, then quadratic growth with a cap.

use std::time::Duration;

/// Delay used while the failure count is at or below `fast_failures`.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(3_000);

/// Upper bound for any retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(300_000);

/// Failures tolerated before the delay starts growing.
pub const MAX_FAST_FAILURES: u32 = 7;

/// Maps a consecutive-failure count to the wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub fast_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_delay: MIN_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
            fast_failures: MAX_FAST_FAILURES,
        }
    }
}

impl BackoffPolicy {
    /// Retry delay after `failures` consecutive abnormal closes.
    ///
    /// `failures <= fast_failures` gives `min_delay`; above that the delay is
    /// `min_delay * failures^2`, capped at `max_delay`.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures <= self.fast_failures {
            return self.min_delay;
        }

        let factor = failures.saturating_mul(failures);
        self.min_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}
