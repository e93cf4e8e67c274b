//! Per-host circuit breakers and their registry.
//!
//! One circuit guards one daemon host. Connection-level faults count toward
//! tripping it; semantic daemon errors never touch it. The `open ->
//! half-open` transition is sampled lazily on the next selection or call,
//! there is no background timer.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Message used when a call is rejected because the breaker is still open.
pub(crate) const CIRCUIT_OPEN_MSG: &str = "Timeout not elapsed yet, circuit breaker still open";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Three-state breaker for a single host identifier.
#[derive(Debug)]
pub struct Circuit {
    inner: Mutex<CircuitInner>,
    max_fails: u32,
    reset_timeout: Duration,
}

impl Circuit {
    fn new(max_fails: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            max_fails,
            reset_timeout,
        }
    }

    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Force the circuit open. Operator/test hook; the trip timer starts now.
    pub fn open(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
    }

    /// Force the circuit half-open, allowing the next call through.
    pub fn half_open(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::HalfOpen;
    }

    /// Reset to closed and forget recorded failures.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Whether selection may hand this host out. An open circuit whose reset
    /// timeout has elapsed half-opens here and becomes eligible again.
    pub fn is_selectable(&self) -> bool {
        self.try_acquire()
    }

    /// Gate one call. Returns false while the circuit is open and the reset
    /// timeout has not elapsed; otherwise (lazily half-opening if due) the
    /// call may proceed.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call: the failure streak ends and a half-open
    /// circuit closes.
    pub(crate) fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
        }
    }

    /// Record a connection-level failure. Trips to open on the
    /// `max_fails`-th consecutive failure, or immediately from half-open.
    pub(crate) fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.max_fails {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
        }
    }
}

/// Lazily-populated map of host identifier to circuit. Shared by the pool
/// (selection filtering) and the executor (call gating).
pub struct CircuitRegistry {
    circuits: DashMap<String, Arc<Circuit>>,
    max_fails: u32,
    reset_timeout: Duration,
}

impl CircuitRegistry {
    pub fn new(max_fails: u32, reset_timeout: Duration) -> Self {
        Self {
            circuits: DashMap::new(),
            max_fails,
            reset_timeout,
        }
    }

    /// The circuit for a host identifier, materialized on first reference.
    pub fn get_circuit(&self, host_id: &str) -> Arc<Circuit> {
        self.circuits
            .entry(host_id.to_string())
            .or_insert_with(|| Arc::new(Circuit::new(self.max_fails, self.reset_timeout)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circuit(max_fails: u32, reset_timeout: Duration) -> Circuit {
        Circuit::new(max_fails, reset_timeout)
    }

    #[test]
    fn trips_on_the_max_fails_th_consecutive_failure() {
        let circuit = circuit(2, Duration::from_secs(60));
        circuit.record_failure();
        assert_eq!(circuit.current_state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 1);

        circuit.record_failure();
        assert_eq!(circuit.current_state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let circuit = circuit(2, Duration::from_secs(60));
        circuit.record_failure();
        circuit.record_success();
        circuit.record_failure();
        assert_eq!(circuit.current_state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 1);
    }

    #[test]
    fn open_circuit_rejects_until_timeout_elapses() {
        let circuit = circuit(1, Duration::from_secs(60));
        circuit.record_failure();
        assert_eq!(circuit.current_state(), CircuitState::Open);
        assert!(!circuit.try_acquire());
        assert!(!circuit.is_selectable());
    }

    #[test]
    fn open_circuit_half_opens_after_timeout() {
        let circuit = circuit(1, Duration::from_millis(0));
        circuit.record_failure();
        assert_eq!(circuit.current_state(), CircuitState::Open);

        // Zero reset timeout: the next acquire samples the elapsed timer
        // and lets the probe call through.
        assert!(circuit.try_acquire());
        assert_eq!(circuit.current_state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_on_success() {
        let circuit = circuit(1, Duration::from_secs(60));
        circuit.record_failure();
        circuit.half_open();
        circuit.record_success();
        assert_eq!(circuit.current_state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
    }

    #[test]
    fn half_open_reopens_on_any_failure() {
        let circuit = circuit(5, Duration::from_secs(60));
        circuit.open();
        circuit.half_open();
        circuit.record_failure();
        assert_eq!(circuit.current_state(), CircuitState::Open);
    }

    #[test]
    fn explicit_transitions_for_operators() {
        let circuit = circuit(5, Duration::from_secs(60));
        circuit.open();
        assert_eq!(circuit.current_state(), CircuitState::Open);
        circuit.half_open();
        assert_eq!(circuit.current_state(), CircuitState::HalfOpen);
        circuit.close();
        assert_eq!(circuit.current_state(), CircuitState::Closed);
    }

    #[test]
    fn registry_materializes_circuits_lazily_and_once() {
        let registry = CircuitRegistry::new(5, Duration::from_secs(60));
        let first = registry.get_circuit("localhost:2375");
        first.open();
        let second = registry.get_circuit("localhost:2375");
        assert_eq!(second.current_state(), CircuitState::Open);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn state_strings_match_the_wire_format() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.as_str(), "open");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half-open");
    }
}
