//! Three-state circuit breaker (spec §4.F). Lifted almost directly
//! from the teacher's `fc-router::mediator::CircuitBreaker` — same
//! state shape, same Closed/Open/HalfOpen transitions — generalized
//! from "one breaker per mediator target" to "one breaker per named
//! category" via `CircuitBreakerRegistry`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub half_open_trial_permits: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, open_duration: Duration::from_secs(30), half_open_trial_permits: 1 }
    }
}

/// Per-breaker critical section is a single `RwLock` guarding `state`
/// and `opened_at` together (spec §5: "state transitions are
/// serialized under a single critical section per breaker").
pub struct CircuitBreaker {
    name: String,
    state: RwLock<CircuitState>,
    opened_at: RwLock<Option<Instant>>,
    failure_count: AtomicU32,
    half_open_in_flight: AtomicU32,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(CircuitState::Closed),
            opened_at: RwLock::new(None),
            failure_count: AtomicU32::new(0),
            half_open_in_flight: AtomicU32::new(0),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    /// Called before dispatching a call. Returns `false` when the
    /// caller should short-circuit with `CircuitOpen`.
    pub fn allow_request(&self) -> bool {
        let current = *self.state.read();
        match current {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let in_flight = self.half_open_in_flight.fetch_add(1, Ordering::AcqRel);
                if in_flight < self.config.half_open_trial_permits {
                    true
                } else {
                    self.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
                    false
                }
            }
            CircuitState::Open => {
                let opened_at = *self.opened_at.read();
                match opened_at {
                    Some(t) if t.elapsed() >= self.config.open_duration => {
                        let mut state = self.state.write();
                        if *state == CircuitState::Open {
                            *state = CircuitState::HalfOpen;
                            self.half_open_in_flight.store(1, Ordering::Release);
                            info!(breaker = %self.name, "circuit breaker trial permitted, transitioning to half-open");
                            metrics::counter!("catga_circuit_breaker_half_open_total", "breaker" => self.name.clone()).increment(1);
                            true
                        } else {
                            // Another thread already transitioned it; re-check.
                            drop(state);
                            self.allow_request()
                        }
                    }
                    _ => false,
                }
            }
        }
    }

    pub fn record_success(&self) {
        let current = *self.state.read();
        match current {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
            }
            CircuitState::HalfOpen => {
                let mut state = self.state.write();
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Release);
                self.half_open_in_flight.store(0, Ordering::Release);
                info!(breaker = %self.name, "circuit breaker closed after successful trial");
                metrics::counter!("catga_circuit_breaker_closed_total", "breaker" => self.name.clone()).increment(1);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let current = *self.state.read();
        match current {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    let mut state = self.state.write();
                    *state = CircuitState::Open;
                    *self.opened_at.write() = Some(Instant::now());
                    warn!(breaker = %self.name, failures, "circuit breaker tripped open");
                    metrics::counter!("catga_circuit_breaker_opened_total", "breaker" => self.name.clone()).increment(1);
                }
            }
            CircuitState::HalfOpen => {
                let mut state = self.state.write();
                *state = CircuitState::Open;
                *self.opened_at.write() = Some(Instant::now());
                self.half_open_in_flight.store(0, Ordering::Release);
                warn!(breaker = %self.name, "half-open trial failed, reopening circuit");
                metrics::counter!("catga_circuit_breaker_opened_total", "breaker" => self.name.clone()).increment(1);
            }
            CircuitState::Open => {}
        }
    }
}
