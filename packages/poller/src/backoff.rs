//! Delay policies between poll cycles.

use std::fmt::Debug;
use std::time::Duration;

/// Decides how long to wait before the next cycle.
///
/// `consecutive_failures` is zero after a successful cycle.
pub trait BackoffPolicy: Send + Sync + Debug {
    /// Returns the delay until the next cycle.
    fn next_delay(&self, interval: Duration, consecutive_failures: u32) -> Duration;
}

/// Always waits the configured interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedInterval;

impl BackoffPolicy for FixedInterval {
    fn next_delay(&self, interval: Duration, _consecutive_failures: u32) -> Duration {
        interval
    }
}

/// Doubles the interval for each consecutive failure, up to `max`.
///
/// With a 5s interval and a 60s cap the failure delays are
/// 10s, 20s, 40s, 60s, 60s, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Upper bound on the delay.
    pub max: Duration,
}

impl ExponentialBackoff {
    /// Creates a policy capped at `max`.
    #[must_use]
    pub const fn new(max: Duration) -> Self {
        Self { max }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, interval: Duration, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return interval;
        }
        let factor = 1u32 << consecutive_failures.min(16);
        interval
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
            .max(interval)
    }
}
