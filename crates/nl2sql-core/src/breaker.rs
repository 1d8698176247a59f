//! Circuit breakers guarding the three external collaborators the pipeline
//! calls into repeatedly: the structured LLM, the vector index, and adapter
//! execution. Each breaker is independent, tracks consecutive failures, and
//! trips into `Open` for `reset_timeout` before allowing one `HalfOpen`
//! probe through.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;
use crate::metrics::METRICS;
use crate::obs::emit_breaker_state_change;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A single named breaker. Cheap to clone the handle (`Arc` internally not
/// required since callers hold it behind a shared reference, e.g. inside an
/// `Arc<Orchestrator>`).
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state, resolving an expired `Open` window into `HalfOpen`.
    pub fn state(&self) -> BreakerState {
        let mut guard = self.inner.lock().unwrap();
        self.resolve_half_open(&mut guard);
        guard.state
    }

    fn resolve_half_open(&self, guard: &mut Inner) {
        if guard.state == BreakerState::Open {
            if let Some(opened_at) = guard.opened_at {
                if opened_at.elapsed() >= Duration::from_secs_f64(self.config.reset_timeout_sec) {
                    guard.state = BreakerState::HalfOpen;
                }
            }
        }
    }

    /// `true` if a call may proceed right now (Closed, or HalfOpen probe slot).
    pub fn allow(&self) -> bool {
        let mut guard = self.inner.lock().unwrap();
        self.resolve_half_open(&mut guard);
        !matches!(guard.state, BreakerState::Open)
    }

    pub fn record_success(&self) {
        let mut guard = self.inner.lock().unwrap();
        let previous = guard.state;
        guard.state = BreakerState::Closed;
        guard.consecutive_failures = 0;
        guard.opened_at = None;
        if previous != BreakerState::Closed {
            emit_breaker_state_change(self.name, state_str(previous), state_str(BreakerState::Closed));
        }
    }

    /// Record a failure. `countable` lets callers exclude failure classes
    /// that should not drive the breaker open (the LLM breaker excludes
    /// rate-limit errors from its trip count).
    pub fn record_failure(&self, countable: bool) {
        if !countable {
            return;
        }
        let mut guard = self.inner.lock().unwrap();
        let previous = guard.state;
        guard.consecutive_failures += 1;
        if guard.state == BreakerState::HalfOpen || guard.consecutive_failures >= self.config.failure_threshold {
            guard.state = BreakerState::Open;
            guard.opened_at = Some(Instant::now());
        }
        if previous != guard.state && guard.state == BreakerState::Open {
            METRICS.inc_breaker_trips();
            emit_breaker_state_change(self.name, state_str(previous), state_str(BreakerState::Open));
        }
    }
}

fn state_str(state: BreakerState) -> &'static str {
    match state {
        BreakerState::Closed => "closed",
        BreakerState::Open => "open",
        BreakerState::HalfOpen => "half_open",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", BreakerConfig { failure_threshold: 3, reset_timeout_sec: 0.05 })
    }

    #[test]
    fn trips_open_after_threshold_consecutive_failures() {
        let b = breaker();
        assert!(b.allow());
        b.record_failure(true);
        b.record_failure(true);
        assert!(b.allow());
        b.record_failure(true);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let b = breaker();
        b.record_failure(true);
        b.record_failure(true);
        b.record_success();
        b.record_failure(true);
        b.record_failure(true);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn uncountable_failures_never_trip_the_breaker() {
        let b = breaker();
        for _ in 0..10 {
            b.record_failure(false);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens_immediately() {
        let b = breaker();
        b.record_failure(true);
        b.record_failure(true);
        b.record_failure(true);
        assert_eq!(b.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_failure(true);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_probe_success_closes_the_breaker() {
        let b = breaker();
        b.record_failure(true);
        b.record_failure(true);
        b.record_failure(true);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
