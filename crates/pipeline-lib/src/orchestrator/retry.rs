//! Stage retry policy

use std::time::Duration;

/// Bounded retries with exponential backoff and a per-attempt timeout
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per stage before escalation (default: 3)
    pub max_attempts: u32,
    /// Delay after the first failure (default: 1 second)
    pub initial_backoff: Duration,
    /// Backoff ceiling (default: 30 seconds)
    pub max_backoff: Duration,
    /// Upper bound on one stage attempt (default: 120 seconds)
    pub stage_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            stage_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following the `failures`-th failure
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let mut backoff = self.initial_backoff;
        for _ in 1..failures {
            backoff = std::cmp::min(backoff * 2, self.max_backoff);
        }
        std::cmp::min(backoff, self.max_backoff)
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}
