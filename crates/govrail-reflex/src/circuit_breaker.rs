//! Per-target circuit breaker guarding calls to upstream tools/dependencies.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use govrail_types::{CircuitState, GovrailError, GovrailResult};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_ms: 30_000,
            half_open_max_probes: 1,
        }
    }
}

struct TargetState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl TargetState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
        }
    }
}

pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    targets: Mutex<HashMap<String, TargetState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            targets: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self, target: &str) -> CircuitState {
        let mut targets = self.targets.lock().expect("circuit breaker registry poisoned");
        self.resolve_state(&mut targets, target)
    }

    /// Transitions `OPEN -> HALF_OPEN` if `recovery_timeout_ms` has elapsed,
    /// without yet recording a call outcome.
    fn resolve_state(&self, targets: &mut HashMap<String, TargetState>, target: &str) -> CircuitState {
        let entry = targets.entry(target.to_string()).or_insert_with(TargetState::new);
        if entry.state == CircuitState::Open {
            if let Some(opened_at) = entry.opened_at {
                let elapsed = Utc::now() - opened_at;
                if elapsed >= ChronoDuration::milliseconds(self.config.recovery_timeout_ms as i64) {
                    entry.state = CircuitState::HalfOpen;
                    entry.consecutive_successes = 0;
                    info!(target, "circuit breaker entering half-open probe");
                }
            }
        }
        entry.state
    }

    fn record_success(&self, target: &str) {
        let mut targets = self.targets.lock().expect("circuit breaker registry poisoned");
        let entry = targets.entry(target.to_string()).or_insert_with(TargetState::new);
        entry.consecutive_failures = 0;
        match entry.state {
            CircuitState::HalfOpen => {
                entry.consecutive_successes += 1;
                if entry.consecutive_successes >= self.config.half_open_max_probes {
                    entry.state = CircuitState::Closed;
                    entry.opened_at = None;
                    info!(target, "circuit breaker closed after successful probes");
                }
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    fn record_failure(&self, target: &str) {
        let mut targets = self.targets.lock().expect("circuit breaker registry poisoned");
        let entry = targets.entry(target.to_string()).or_insert_with(TargetState::new);
        entry.consecutive_successes = 0;
        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Utc::now());
                warn!(target, "circuit breaker re-opened on probe failure");
            }
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.config.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Utc::now());
                    warn!(target, failures = entry.consecutive_failures, "circuit breaker opened");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Runs `f` against `target` if the breaker allows it; otherwise fails
    /// fast with `CIRCUIT_BREAKER_OPEN`.
    pub async fn guard<F, Fut, T, E>(&self, target: &str, f: F) -> GovrailResult<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let state = self.state(target);
        if state == CircuitState::Open {
            return Err(GovrailError::CircuitBreakerOpen {
                target: target.to_string(),
            });
        }

        let result = f().await;
        match &result {
            Ok(_) => self.record_success(target),
            Err(_) => self.record_failure(target),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S5 — three consecutive failures trip the breaker; a half-open probe
    /// success closes it, a half-open probe failure re-opens it.
    #[tokio::test]
    async fn s5_breaker_trips_and_recovers() {
        let breaker = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 0,
            half_open_max_probes: 1,
        });

        for _ in 0..3 {
            let _: GovrailResult<Result<(), &str>> = breaker.guard("tool-a", || async { Err("boom") }).await;
        }
        assert_eq!(breaker.state("tool-a"), CircuitState::Open);

        let rejected: GovrailResult<Result<(), &str>> = breaker.guard("tool-a", || async { Ok(()) }).await;
        assert!(matches!(rejected, Err(GovrailError::CircuitBreakerOpen { .. })));
    }

    #[tokio::test]
    async fn half_open_success_closes_breaker() {
        let breaker = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_ms: 0,
            half_open_max_probes: 1,
        });
        let _: GovrailResult<Result<(), &str>> = breaker.guard("tool-b", || async { Err("boom") }).await;
        assert_eq!(breaker.state("tool-b"), CircuitState::Open);

        // recovery_timeout_ms=0, so the next state() call flips to half-open.
        let probe: GovrailResult<Result<(), &str>> = breaker.guard("tool-b", || async { Ok(()) }).await;
        assert!(probe.is_ok());
        assert_eq!(breaker.state("tool-b"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_breaker() {
        let breaker = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_ms: 0,
            half_open_max_probes: 1,
        });
        let _: GovrailResult<Result<(), &str>> = breaker.guard("tool-c", || async { Err("boom") }).await;
        let _: GovrailResult<Result<(), &str>> = breaker.guard("tool-c", || async { Err("boom again") }).await;
        assert_eq!(breaker.state("tool-c"), CircuitState::Open);
    }
}
