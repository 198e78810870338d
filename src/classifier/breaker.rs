//! Circuit breaker guarding the model-backed classifier.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub consecutive_failures: u32,
    pub open: bool,
}

/// Opens after `threshold` consecutive failures and stays open for
/// `cooldown` after the most recent one. Once the cooldown passes, requests
/// flow again until the next recorded failure re-opens it for another
/// cooldown. A recorded success closes it.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_open(&self, state: &BreakerState, now: Instant) -> bool {
        state.consecutive_failures >= self.threshold
            && state
                .last_failure
                .is_some_and(|at| now.saturating_duration_since(at) < self.cooldown)
    }

    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now())
    }

    pub fn allow_request_at(&self, now: Instant) -> bool {
        !self.is_open(&self.lock(), now)
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.consecutive_failures >= self.threshold {
            info!("Classifier circuit breaker closed");
        }
        state.consecutive_failures = 0;
        state.last_failure = None;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(now);
        if state.consecutive_failures == self.threshold {
            warn!(
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Classifier circuit breaker opened"
            );
        }
    }

    pub fn reset(&self) {
        *self.lock() = BreakerState::default();
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        BreakerSnapshot {
            consecutive_failures: state.consecutive_failures,
            open: self.is_open(&state, Instant::now()),
        }
    }
}
