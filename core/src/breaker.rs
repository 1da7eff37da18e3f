use crate::clock::Clock;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    pub threshold: u32,
    pub cooldown_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown_ms: 5 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Cool-down elapsed; one trial may run and its failure re-opens.
    HalfOpen,
}

#[derive(Debug, Default, Clone, Copy)]
struct EndpointCircuit {
    failures: u32,
    opened_at: Option<Instant>,
    half_open: bool,
    /// When the current half-open trial was handed out.
    trial_started: Option<Instant>,
}

impl EndpointCircuit {
    /// Moves an open circuit whose cool-down has passed to half-open.
    fn cool_down(&mut self, now: Instant, cooldown: Duration) {
        if self
            .opened_at
            .is_some_and(|opened_at| now.saturating_duration_since(opened_at) >= cooldown)
        {
            self.opened_at = None;
            self.failures = 0;
            self.half_open = true;
            self.trial_started = None;
        }
    }

    fn state(&self) -> CircuitState {
        if self.opened_at.is_some() {
            CircuitState::Open
        } else if self.half_open {
            CircuitState::HalfOpen
        } else {
            CircuitState::Closed
        }
    }
}

/// Per-endpoint failure gate.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    circuits: Mutex<HashMap<String, EndpointCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Counts a failed operation and returns the resulting state.
    pub fn record_failure(&self, endpoint: &str) -> CircuitState {
        let now = self.clock.now();
        let threshold = self.config.threshold.max(1);
        let mut circuits = self.lock();
        let circuit = circuits.entry(endpoint.to_string()).or_default();
        if circuit.opened_at.is_some() {
            circuit.failures = circuit.failures.saturating_add(1);
            return CircuitState::Open;
        }
        if circuit.half_open {
            circuit.half_open = false;
            circuit.trial_started = None;
            circuit.failures = threshold;
            circuit.opened_at = Some(now);
            debug!(endpoint, "half-open trial failed; circuit re-opened");
            return CircuitState::Open;
        }
        circuit.failures = circuit.failures.saturating_add(1);
        if circuit.failures >= threshold {
            circuit.opened_at = Some(now);
            return CircuitState::Open;
        }
        CircuitState::Closed
    }

    pub fn record_success(&self, endpoint: &str) {
        self.lock().remove(endpoint);
    }

    pub fn is_open(&self, endpoint: &str) -> bool {
        self.state(endpoint) == CircuitState::Open
    }

    /// Current state; moves an expired open circuit to half-open.
    pub fn state(&self, endpoint: &str) -> CircuitState {
        let now = self.clock.now();
        let cooldown = self.config.cooldown();
        let mut circuits = self.lock();
        let Some(circuit) = circuits.get_mut(endpoint) else {
            return CircuitState::Closed;
        };
        circuit.cool_down(now, cooldown);
        circuit.state()
    }

    /// Asks to run one attempt against `endpoint`.
    ///
    /// `Closed` admits the attempt. `HalfOpen` admits it as the single trial
    /// of this cool-down; every other caller gets `Open` until the trial
    /// reports back. A trial that never reports is given up after another
    /// cool-down.
    pub fn try_acquire(&self, endpoint: &str) -> CircuitState {
        let now = self.clock.now();
        let cooldown = self.config.cooldown();
        let mut circuits = self.lock();
        let Some(circuit) = circuits.get_mut(endpoint) else {
            return CircuitState::Closed;
        };
        circuit.cool_down(now, cooldown);
        match circuit.state() {
            CircuitState::HalfOpen => {
                let available = circuit
                    .trial_started
                    .is_none_or(|started| now.saturating_duration_since(started) >= cooldown);
                if available {
                    circuit.trial_started = Some(now);
                    debug!(endpoint, "half-open trial admitted");
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            state => state,
        }
    }

    pub fn failure_count(&self, endpoint: &str) -> u32 {
        self.lock()
            .get(endpoint)
            .map_or(0, |circuit| circuit.failures)
    }

    pub fn reset(&self, endpoint: &str) {
        self.lock().remove(endpoint);
    }

    pub fn reset_all(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, EndpointCircuit>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
