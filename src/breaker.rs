//! Circuit Breaker (C12, §4.12).
//!
//! Gates new runs on consecutive failure counts. Three states — closed,
//! open, half-open — with the transitions specified in §4.12; `reset()`
//! force-closes regardless of current state.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// The breaker's current state (§3 `CircuitBreakerState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
}

/// A snapshot of breaker status for external reporting (§6 `/recovery/status`).
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    pub state: State,
    pub failure_count: u32,
    pub success_count: u32,
    pub can_retry: bool,
}

/// The Circuit Breaker (C12), owned by the Run Controller.
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, reset_timeout: Duration) -> Self {
        CircuitBreaker {
            failure_threshold,
            success_threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                last_state_change: Utc::now(),
            }),
        }
    }

    /// Defaults per §4.12: failure_threshold=5, success_threshold=3, reset_timeout=60s.
    pub fn with_defaults() -> Self {
        Self::new(5, 3, Duration::from_secs(60))
    }

    /// Whether a request should currently be admitted; may transition
    /// Open → HalfOpen as a side effect once the reset timeout has elapsed
    /// (§4.12).
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => true,
            State::HalfOpen => true,
            State::Open => {
                let elapsed_ok = inner
                    .last_failure_at
                    .map(|t| Utc::now() - t >= chrono::Duration::from_std(self.reset_timeout).unwrap())
                    .unwrap_or(false);
                if elapsed_ok {
                    inner.state = State::HalfOpen;
                    inner.last_state_change = Utc::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => {
                inner.failure_count = 0;
            }
            State::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = State::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_state_change = Utc::now();
                }
            }
            State::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.last_state_change = Utc::now();
                }
            }
            State::HalfOpen => {
                inner.state = State::Open;
                inner.success_count = 0;
                inner.last_state_change = Utc::now();
            }
            State::Open => {}
        }
    }

    /// Force-close the breaker regardless of its current state (§4.12,
    /// §6 `/recovery/circuit-breaker/reset`).
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = State::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_at = None;
        inner.last_state_change = Utc::now();
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        let can_retry = match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => inner
                .last_failure_at
                .map(|t| Utc::now() - t >= chrono::Duration::from_std(self.reset_timeout).unwrap())
                .unwrap_or(false),
        };
        BreakerStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            can_retry,
        }
    }

    /// How long until the breaker allows a probe, if currently open.
    pub fn retry_after(&self) -> Duration {
        let inner = self.inner.lock();
        match (inner.state, inner.last_failure_at) {
            (State::Open, Some(last)) => {
                let elapsed = (Utc::now() - last).to_std().unwrap_or(Duration::ZERO);
                self.reset_timeout.saturating_sub(elapsed)
            }
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(3, 2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.status().state, State::Closed);
        breaker.record_failure();
        assert_eq!(breaker.status().state, State::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.status().state, State::Open);
        assert!(breaker.allow_request());
        assert_eq!(breaker.status().state, State::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.status().state, State::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.status().state, State::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.status().state, State::Open);
    }

    #[test]
    fn reset_force_closes() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_secs(60));
        breaker.record_failure();
        assert_eq!(breaker.status().state, State::Open);
        breaker.reset();
        assert_eq!(breaker.status().state, State::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn open_rejects_strictly_until_timeout_elapses() {
        let breaker = CircuitBreaker::new(1, 2, Duration::from_secs(3600));
        breaker.record_failure();
        assert!(!breaker.allow_request());
        assert!(!breaker.allow_request());
    }
}
