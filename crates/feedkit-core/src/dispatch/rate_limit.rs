use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window request limiter shared by all dispatch workers.
///
/// Keeps the admission times of the last `max_per_second` requests. A caller
/// is admitted once fewer than `max_per_second` of them fall inside the
/// trailing one-second window.
///
/// The check-and-record sequence runs under one async mutex, and a caller
/// that has to wait sleeps while holding it. Waiters therefore queue on the
/// mutex, which tokio hands out in FIFO order.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_second: usize,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A limiter admitting at most `max_per_second` requests per second
    /// (minimum 1).
    pub fn new(max_per_second: usize) -> Self {
        let max_per_second = max_per_second.max(1);
        Self {
            max_per_second,
            admitted: Mutex::new(VecDeque::with_capacity(max_per_second)),
        }
    }

    pub fn max_per_second(&self) -> usize {
        self.max_per_second
    }

    /// Wait until a request slot is free, then claim it.
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();
            while admitted
                .front()
                .is_some_and(|&t| now.duration_since(t) >= WINDOW)
            {
                admitted.pop_front();
            }

            if admitted.len() < self.max_per_second {
                admitted.push_back(now);
                return;
            }

            // Full window: wait for the oldest admission to age out.
            if let Some(&oldest) = admitted.front() {
                let wait_until = oldest + WINDOW;
                tracing::trace!(wait_ms = (wait_until - now).as_millis() as u64, "rate limited");
                tokio::time::sleep_until(wait_until).await;
            }
        }
    }
}
