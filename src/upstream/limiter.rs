//! Fixed-window rate limiter for outbound upstream calls.
//!
//! At most `limit` admissions per `window` across all callers. A caller that
//! finds the window exhausted sleeps until the boundary and retries; the
//! counter lock is never held across the sleep.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Snapshot of the limiter for the metrics surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSnapshot {
    /// Admissions consumed in the current window.
    pub current: u32,
    pub limit: u32,
    /// Window length in milliseconds.
    pub window: u64,
    /// Milliseconds until the current window resets.
    pub reset_time: u64,
}

struct Window {
    started_at: Instant,
    admitted: u32,
}

pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            state: Mutex::new(Window {
                started_at: Instant::now(),
                admitted: 0,
            }),
        }
    }

    /// Wait until a token is available and consume it. Cache reads never go
    /// through here; only actual upstream calls consume tokens.
    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut window = self.state.lock().unwrap();
                let now = Instant::now();
                if now.duration_since(window.started_at) >= self.window {
                    window.started_at = now;
                    window.admitted = 0;
                }
                if window.admitted < self.limit {
                    window.admitted += 1;
                    return;
                }
                window.started_at + self.window
            };
            debug!(
                wait_ms = wake_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "rate limit reached, waiting for next window"
            );
            tokio::time::sleep_until(wake_at).await;
        }
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let window = self.state.lock().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(window.started_at);
        let (current, reset_in) = if elapsed >= self.window {
            (0, self.window)
        } else {
            (window.admitted, self.window - elapsed)
        };
        RateLimitSnapshot {
            current,
            limit: self.limit,
            window: self.window.as_millis() as u64,
            reset_time: reset_in.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn admits_at_most_limit_per_window() {
        let limiter = Arc::new(FixedWindowLimiter::new(3, Duration::from_secs(60)));
        let admitted_in_first_window = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..7 {
            let limiter = Arc::clone(&limiter);
            let counter = Arc::clone(&admitted_in_first_window);
            handles.push(tokio::spawn(async move {
                let before = Instant::now();
                limiter.acquire().await;
                if before.elapsed() < Duration::from_secs(60) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        // Let the first window's admissions settle.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(admitted_in_first_window.load(Ordering::SeqCst), 3);

        // Everyone completes after the boundary passes (7 callers span three
        // windows at 3 per window).
        tokio::time::advance(Duration::from_secs(130)).await;
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_the_boundary() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(10));
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.snapshot().current, 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(limiter.snapshot().current, 0);

        // Fresh window admits immediately.
        limiter.acquire().await;
        assert_eq!(limiter.snapshot().current, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_reset_time() {
        let limiter = FixedWindowLimiter::new(5, Duration::from_secs(60));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(20)).await;

        let snap = limiter.snapshot();
        assert_eq!(snap.current, 1);
        assert_eq!(snap.limit, 5);
        assert_eq!(snap.window, 60_000);
        assert!(snap.reset_time <= 40_000);
    }
}
