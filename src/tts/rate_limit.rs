//! Process-wide sliding-window rate limiter for the remote TTS API.
//!
//! Two mechanisms compose: a sliding window (at most `rpm` requests per
//! rolling 60 seconds, with a 0.5 s safety margin) and an async mutex
//! that keeps at most one synthesis call in flight. The window lock is
//! always taken strictly before the call mutex, so the two can never
//! deadlock against each other.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

/// Default requests allowed per rolling window.
pub const DEFAULT_RPM: usize = 6;

const WINDOW: Duration = Duration::from_secs(60);
const SAFETY_MARGIN: Duration = Duration::from_millis(500);

/// Shared by every orchestrator talking to the same remote engine.
pub struct RateLimiter {
    rpm: usize,
    request_times: Mutex<VecDeque<Instant>>,
    call_lock: Arc<Mutex<()>>,
}

impl RateLimiter {
    pub fn new(rpm: usize) -> Self {
        Self {
            rpm: rpm.max(1),
            request_times: Mutex::new(VecDeque::new()),
            call_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Block until the sliding window admits another request, then record
    /// the request timestamp. Timestamps are recorded for every attempt,
    /// successful or not.
    pub async fn wait_for_slot(&self) {
        loop {
            let sleep_until = {
                let mut times = self.request_times.lock().await;
                let now = Instant::now();

                while times.front().is_some_and(|t| now - *t >= WINDOW) {
                    times.pop_front();
                }

                if times.len() < self.rpm {
                    times.push_back(now);
                    debug!(in_window = times.len(), rpm = self.rpm, "rate limiter slot taken");
                    return;
                }

                let oldest = *times.front().expect("window is non-empty");
                oldest + WINDOW + SAFETY_MARGIN
            };

            let wait = sleep_until - Instant::now();
            info!(wait_ms = wait.as_millis() as u64, "rate limit window full, sleeping");
            tokio::time::sleep_until(sleep_until).await;
        }
    }

    /// Acquire the single-call mutex. Held for the duration of one HTTP
    /// synthesis attempt.
    pub async fn lock_call(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.call_lock).lock_owned().await
    }

    /// Number of requests recorded inside the current window.
    pub async fn requests_in_window(&self) -> usize {
        let mut times = self.request_times.lock().await;
        let now = Instant::now();
        while times.front().is_some_and(|t| now - *t >= WINDOW) {
            times.pop_front();
        }
        times.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RPM)
    }
}
