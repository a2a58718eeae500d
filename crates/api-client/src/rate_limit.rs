//! Sliding-window request limiter
//!
//! Keeps the instants of recent requests and prunes anything older than the
//! window on each call. When the window is full the caller sleeps until the
//! oldest request leaves it, then the window is cleared rather than
//! re-checked. The lock is held across that sleep, so waiting callers queue
//! up behind it instead of polling.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Length of the accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Process-wide limiter shared by every request of one API client.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Allow at most `limit` requests per 60 seconds. A zero limit is treated as 1.
    pub fn new(limit: u32) -> Self {
        Self::with_window(limit, WINDOW)
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        let limit = limit.max(1) as usize;
        Self {
            limit,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Wait until one more request fits in the window, then record it.
    ///
    /// Never fails; only delays the calling task.
    pub async fn acquire(&self) {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        prune(&mut timestamps, now, self.window);

        if timestamps.len() >= self.limit {
            if let Some(&oldest) = timestamps.front() {
                let wait = self
                    .window
                    .saturating_sub(now.saturating_duration_since(oldest));
                if !wait.is_zero() {
                    warn!(
                        wait_secs = wait.as_secs_f64(),
                        limit = self.limit,
                        "rate limit reached, waiting"
                    );
                    metrics::counter!("rate_limit_waits_total").increment(1);
                    tokio::time::sleep(wait).await;
                }
            }
            timestamps.clear();
        }

        timestamps.push_back(Instant::now());
    }

    /// Requests currently counted in the window.
    pub async fn in_window(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        prune(&mut timestamps, Instant::now(), self.window);
        timestamps.len()
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = timestamps.front() {
        if now.saturating_duration_since(oldest) < window {
            break;
        }
        timestamps.pop_front();
    }
}
