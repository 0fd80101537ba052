use std::thread;
use std::time::Duration;

use tracing::debug;

/// Bounded, exponentially backed-off retry of a fallible step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero means never try.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Delay before attempt `attempt + 1`, for `attempt >= 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Call `step` until it returns true or attempts run out.
    pub fn run(&self, mut step: impl FnMut(u32) -> bool) -> bool {
        for attempt in 1..=self.max_attempts {
            if step(attempt) {
                return true;
            }
            if attempt < self.max_attempts {
                let delay = self.backoff(attempt);
                debug!(attempt, ?delay, "attempt failed, retrying");
                thread::sleep(delay);
            }
        }
        false
    }
}
