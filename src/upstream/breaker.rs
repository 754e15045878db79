//! Circuit breaker guarding the upstream.
//!
//! Single instance per upstream (not keyed per operation). CLOSED passes
//! calls through and counts consecutive failures; OPEN suppresses the
//! primary entirely and serves the caller's fallback; HALF_OPEN runs the
//! primary on trial until enough successes close the circuit again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::upstream::errors::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot for the metrics surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerMetrics {
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub ms_since_last_failure: Option<u64>,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    trial_successes: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    success_threshold: u32,
    inner: Mutex<Inner>,
}

enum Admission {
    Permit,
    Rejected,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration, success_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            timeout,
            success_threshold: success_threshold.max(1),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                trial_successes: 0,
                opened_at: None,
                last_failure_at: None,
                last_failure_time: None,
            }),
        }
    }

    /// Run `primary` under the breaker. When the circuit is open, fails with
    /// `BreakerOpen` without touching the primary.
    pub async fn execute<T, P>(&self, primary: P) -> Result<T, UpstreamError>
    where
        P: Future<Output = Result<T, UpstreamError>>,
    {
        match self.admit() {
            Admission::Rejected => Err(UpstreamError::BreakerOpen),
            Admission::Permit => {
                let result = primary.await;
                self.record(&result);
                result
            }
        }
    }

    /// Run `primary` under the breaker, diverting to `fallback` when the
    /// circuit is open or the primary fails.
    pub async fn execute_with_fallback<T, P, F, FFut>(
        &self,
        primary: P,
        fallback: F,
    ) -> Result<T, UpstreamError>
    where
        P: Future<Output = Result<T, UpstreamError>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, UpstreamError>>,
    {
        match self.admit() {
            Admission::Rejected => fallback().await,
            Admission::Permit => {
                let result = primary.await;
                self.record(&result);
                match result {
                    Ok(value) => Ok(value),
                    Err(_) => fallback().await,
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.inner.lock().unwrap();
        BreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            ms_since_last_failure: inner
                .last_failure_at
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Decide whether a call may run the primary, promoting OPEN -> HALF_OPEN
    /// once the timeout has elapsed.
    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Admission::Permit,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.timeout {
                    info!("circuit breaker half-open, trialing upstream");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_successes = 0;
                    Admission::Permit
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    fn record<T>(&self, result: &Result<T, UpstreamError>) {
        match result {
            Ok(_) => self.on_success(),
            // Client-attributable responses say nothing about upstream
            // health and leave the state machine untouched.
            Err(err) if err.counts_as_breaker_failure() => self.on_failure(),
            Err(_) => {}
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            // The failure count is only zeroed by a successful trial run;
            // ordinary successes leave it untouched.
            BreakerState::Closed => {}
            BreakerState::HalfOpen => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.success_threshold {
                    info!("circuit breaker closed after successful trials");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.trial_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure_at = Some(Instant::now());
        inner.last_failure_time = Some(Utc::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    warn!(
                        failures = inner.failure_count,
                        "circuit breaker opened, diverting to cache fallback"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker reopened after failed trial");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_successes = 0;
            }
            BreakerState::Open => {}
        }
    }
}
