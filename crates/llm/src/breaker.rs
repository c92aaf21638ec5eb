//! Per-(operation, key) circuit breaker

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Opens after a run of consecutive failures and stays open for a cooldown.
/// Keys with an open breaker are masked out of selection; when every key is
/// masked the call fails with `CircuitOpen`.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<(String, usize), BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Whether calls for `operation` on `key_index` are currently blocked.
    /// An expired cooldown closes the breaker and clears the failure run.
    pub fn is_open(&self, operation: &str, key_index: usize) -> bool {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(&(operation.to_string(), key_index)) else {
            return false;
        };
        match state.opened_at {
            Some(opened) if opened.elapsed() < self.cooldown => true,
            Some(_) => {
                state.opened_at = None;
                state.consecutive_failures = 0;
                false
            }
            None => false,
        }
    }

    pub fn record_failure(&self, operation: &str, key_index: usize) {
        let mut states = self.states.lock();
        let state = states
            .entry((operation.to_string(), key_index))
            .or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold && state.opened_at.is_none() {
            state.opened_at = Some(Instant::now());
            tracing::warn!(
                operation,
                key_index,
                failures = state.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }

    pub fn record_success(&self, operation: &str, key_index: usize) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(&(operation.to_string(), key_index)) {
            state.consecutive_failures = 0;
            state.opened_at = None;
        }
    }
}
