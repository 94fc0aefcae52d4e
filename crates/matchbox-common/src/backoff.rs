//! Retry policy shared by every retry loop.
//!
//! The scoring feed reconnects forever, scene switches retry a few times,
//! and clip extraction retries up to a per-job ceiling. All three use the
//! same exponential policy with different parameters; the delays come from
//! `backon`.

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use std::time::Duration;

/// Exponential growth from `initial_interval`, capped at `max_interval`,
/// optionally limited to `max_attempts` total attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub initial_interval: Duration,
    /// Upper bound for any single delay.
    pub max_interval: Duration,
    /// Total attempts including the first; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::bounded(3, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl BackoffPolicy {
    /// Policy that never gives up.
    pub fn unbounded(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_attempts: None,
        }
    }

    /// Policy with a total attempt ceiling.
    pub fn bounded(max_attempts: u32, initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// The `backon` builder for this policy. Its retry count is the attempt
    /// ceiling minus the first attempt.
    pub fn builder(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_interval)
            .with_max_delay(self.max_interval);
        match self.max_attempts {
            Some(attempts) => builder.with_max_times(attempts.saturating_sub(1) as usize),
            None => builder.without_max_times(),
        }
    }

    /// Fresh sequence of delays between attempts.
    pub fn delays(&self) -> ExponentialBackoff {
        self.builder().build()
    }

    /// Delay before the next attempt after `failures` failed ones, or `None`
    /// once the attempt ceiling has been reached.
    pub fn delay_after(&self, failures: u32) -> Option<Duration> {
        self.delays().nth(failures.saturating_sub(1) as usize)
    }
}
