use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::classify::{ClassifiedError, ErrorCategory};

/// Admission denial for an operation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerDenied {
    pub key: String,
    pub reason: String,
}

impl Display for BreakerDenied {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "circuit open for '{}': {}", self.key, self.reason)
    }
}

impl std::error::Error for BreakerDenied {}

/// Circuit breaker consulted before each attempt and told the result after it.
pub trait CircuitBreaker: Send + Sync {
    fn before_request(&self, key: &str) -> Result<(), BreakerDenied>;

    fn on_success(&self, key: &str);

    fn on_failure(&self, key: &str, error: &ClassifiedError);
}

/// Breaker that admits everything.
#[derive(Debug, Default)]
pub struct NoopCircuitBreaker;

impl CircuitBreaker for NoopCircuitBreaker {
    fn before_request(&self, _key: &str) -> Result<(), BreakerDenied> {
        Ok(())
    }

    fn on_success(&self, _key: &str) {}

    fn on_failure(&self, _key: &str, _error: &ClassifiedError) {}
}

/// Runtime circuit state for one operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Thread-safe breaker keeping one circuit per operation key.
///
/// Only upstream-health failures (transient, network, timeout) count toward opening;
/// client errors and rate limiting leave the circuit alone.
#[derive(Debug, Default)]
pub struct KeyedCircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl KeyedCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        let circuits = self
            .circuits
            .lock()
            .expect("circuit breaker lock is not poisoned");
        circuits
            .get(key)
            .map_or(CircuitState::Closed, |circuit| circuit.state)
    }

    pub fn consecutive_failures(&self, key: &str) -> u32 {
        let circuits = self
            .circuits
            .lock()
            .expect("circuit breaker lock is not poisoned");
        circuits
            .get(key)
            .map_or(0, |circuit| circuit.consecutive_failures)
    }

    fn counts(error: &ClassifiedError) -> bool {
        matches!(
            error.category,
            ErrorCategory::Transient | ErrorCategory::Network | ErrorCategory::Timeout
        )
    }
}

impl CircuitBreaker for KeyedCircuitBreaker {
    fn before_request(&self, key: &str) -> Result<(), BreakerDenied> {
        let mut circuits = self
            .circuits
            .lock()
            .expect("circuit breaker lock is not poisoned");
        let Some(circuit) = circuits.get_mut(key) else {
            return Ok(());
        };

        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let can_probe = circuit
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.open_timeout)
                    .unwrap_or(false);

                if can_probe {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.opened_at = None;
                    Ok(())
                } else {
                    Err(BreakerDenied {
                        key: key.to_owned(),
                        reason: format!(
                            "{} consecutive failures",
                            circuit.consecutive_failures
                        ),
                    })
                }
            }
        }
    }

    fn on_success(&self, key: &str) {
        let mut circuits = self
            .circuits
            .lock()
            .expect("circuit breaker lock is not poisoned");
        if let Some(circuit) = circuits.get_mut(key) {
            *circuit = Circuit::default();
        }
    }

    fn on_failure(&self, key: &str, error: &ClassifiedError) {
        if !Self::counts(error) {
            return;
        }

        let mut circuits = self
            .circuits
            .lock()
            .expect("circuit breaker lock is not poisoned");
        let circuit = circuits.entry(key.to_owned()).or_default();
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);

        if circuit.state == CircuitState::HalfOpen
            || circuit.consecutive_failures >= self.config.failure_threshold
        {
            circuit.state = CircuitState::Open;
            circuit.opened_at = Some(Instant::now());
        }
    }
}
