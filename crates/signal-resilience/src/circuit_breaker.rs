use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_metric_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub rolling_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            rolling_window: Duration::from_secs(60),
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

/// Three-state failure guard for a single resource.
///
/// `closed` counts consecutive failures within a rolling window; reaching
/// `failure_threshold` opens the breaker. `open` fails fast until
/// `open_duration` elapses, then allows exactly one `half_open` probe.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                first_failure_at: None,
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    /// Whether a call may proceed right now. In `half_open`, only the first
    /// caller after the cooldown is admitted as the probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = inner.opened_at.expect("open state always has opened_at");
                if opened_at.elapsed() >= self.config.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    false
                } else {
                    inner.half_open_probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.first_failure_at = None;
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_probe_in_flight = false;
                inner.consecutive_failures = 0;
                inner.first_failure_at = None;
            }
            CircuitState::Closed | CircuitState::Open => {
                let now = Instant::now();
                let window_expired = inner
                    .first_failure_at
                    .is_some_and(|first| now.duration_since(first) > self.config.rolling_window);
                if window_expired {
                    inner.consecutive_failures = 0;
                    inner.first_failure_at = None;
                }
                if inner.first_failure_at.is_none() {
                    inner.first_failure_at = Some(now);
                }
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            open_duration: Duration::from_millis(20),
            rolling_window: Duration::from_secs(60),
        })
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = breaker();
        for _ in 0..2 {
            assert!(breaker.allow_request());
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn refuses_calls_while_open_then_half_opens() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.allow_request();
            breaker.record_failure();
        }
        assert!(!breaker.allow_request());
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_and_failure_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.allow_request();
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        for _ in 0..3 {
            breaker.allow_request();
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_second_caller_is_refused_while_probe_in_flight() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.allow_request();
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());
    }
}
