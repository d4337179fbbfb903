// In crates/grpc-clients/src/circuit_breaker.rs

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Failure-counting gate that fast-fails calls to an unhealthy target.
///
/// One breaker exists per RPC client. The owning client's operations may be
/// invoked concurrently, so state transitions go through a mutex; this is a
/// correctness requirement, not a cross-client coordination mechanism.
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    failure_count: u32,
    last_failure: Option<Instant>,
    state: BreakerState,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                failure_count: 0,
                last_failure: None,
                state: BreakerState::Closed,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call may proceed right now.
    ///
    /// In `Open`, an elapsed cooldown transitions the breaker to `HalfOpen`
    /// as a side effect, admitting the probe call.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled_down = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() > self.cooldown);
                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call: resets the failure count and closes.
    pub fn on_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.state = BreakerState::Closed;
    }

    /// Records a failed call, opening the breaker once the threshold is hit.
    pub fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failure_count >= self.failure_threshold {
            inner.state = BreakerState::Open;
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_exactly_at_the_failure_threshold() {
        let breaker = CircuitBreaker::default();

        for _ in 0..4 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_execute());

        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
        assert_eq!(breaker.failure_count(), 5);
    }

    #[test]
    fn cooldown_admits_a_single_probe_then_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));

        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn failure_during_half_open_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));

        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_consecutive_failure_counting() {
        let breaker = CircuitBreaker::default();

        for _ in 0..4 {
            breaker.on_failure();
        }
        breaker.on_success();
        assert_eq!(breaker.failure_count(), 0);

        // Four more failures after the reset must not open the breaker.
        for _ in 0..4 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
