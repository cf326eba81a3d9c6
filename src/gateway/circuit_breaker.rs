// Per-node circuit breaker (spec 4.D.2), adapted from the teacher's
// orchestration::circuit_breaker state machine: Closed -> Open on
// consecutive failures, Open -> HalfOpen after a reset timeout, HalfOpen
// closes after all probe slots succeed or reopens on a single failure.
// All mutable state lives behind one lock so a state transition and its
// accompanying counters can never be observed half-applied.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    opened_at: Option<Instant>,
    consecutive_failures: u32,
    half_open_probes_in_flight: u32,
    half_open_successes: u32,
    trips_total: u64,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_probes: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration, half_open_max_probes: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            half_open_max_probes,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                opened_at: None,
                consecutive_failures: 0,
                half_open_probes_in_flight: 0,
                half_open_successes: 0,
                trips_total: 0,
            }),
        }
    }

    /// Observes the current state, promoting Open -> HalfOpen in place if
    /// the reset timeout has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.maybe_promote_to_half_open(&mut inner);
        inner.state
    }

    fn maybe_promote_to_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= self.reset_timeout {
                inner.state = BreakerState::HalfOpen;
                inner.half_open_probes_in_flight = 0;
                inner.half_open_successes = 0;
            }
        }
    }

    /// Whether a new request may be attempted through this breaker. In
    /// HalfOpen this also reserves a probe slot; callers that get `true`
    /// back MUST call `on_success`/`on_failure` exactly once.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_promote_to_half_open(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.half_open_probes_in_flight < self.half_open_max_probes {
                    inner.half_open_probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        self.maybe_promote_to_half_open(&mut inner);
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.half_open_max_probes {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                }
            }
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        self.maybe_promote_to_half_open(&mut inner);
        match inner.state {
            BreakerState::HalfOpen => self.trip(&mut inner),
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trips_total += 1;
    }

    pub fn trips_total(&self) -> u64 {
        self.inner.lock().trips_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_millis(20), 3)
    }

    #[test]
    fn trips_after_consecutive_failures() {
        let cb = breaker();
        for _ in 0..4 {
            assert!(cb.allow_request());
            cb.on_failure();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow_request());
        cb.on_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let cb = breaker();
        for _ in 0..3 {
            cb.on_failure();
        }
        cb.on_success();
        for _ in 0..4 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_closes_after_all_probes_succeed() {
        let cb = breaker();
        for _ in 0..5 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        for _ in 0..3 {
            assert!(cb.allow_request());
            cb.on_success();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_single_failure_reopens() {
        let cb = breaker();
        for _ in 0..5 {
            cb.on_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(cb.allow_request());
        cb.on_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let cb = breaker();
        for _ in 0..5 {
            cb.on_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        for _ in 0..3 {
            assert!(cb.allow_request());
        }
        assert!(!cb.allow_request());
    }
}
