//! Hand-rolled circuit breaker for the remote provider path (§4.7): opens
//! after `N` consecutive failures, recovers via a single half-open probe.
//! Guarded by its own mutex per §5 — breaker transitions are state-machine
//! events, never free-form writes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while a half-open probe is in flight, so concurrent callers
    /// don't all attempt the single allowed probe at once.
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<Inner>,
}

/// What the caller should do next, decided by [`CircuitBreaker::permit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Proceed normally.
    Allowed,
    /// Proceed, but this call is the single half-open probe; report the
    /// outcome via [`CircuitBreaker::record_success`]/`record_failure`.
    Probe,
    /// Breaker is open; do not call upstream.
    Denied,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Decide whether a call may proceed, transitioning `open` -> `half_open`
    /// once `open_timeout` has elapsed.
    pub fn permit(&self) -> Permit {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Permit::Allowed,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Permit::Denied
                } else {
                    inner.probe_in_flight = true;
                    Permit::Probe
                }
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Permit::Probe
                } else {
                    Permit::Denied
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closing after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!("half-open probe failed, circuit re-opening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opening after consecutive failures"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}
