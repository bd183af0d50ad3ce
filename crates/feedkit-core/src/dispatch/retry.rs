use std::time::Duration;

use rand::Rng;

/// Exponential backoff for transient completion failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 25% random jitter on top of each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (0-based):
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let extra = rand::rng().random_range(0..=delay.as_millis() as u64 / 4);
            delay + Duration::from_millis(extra)
        } else {
            delay
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
