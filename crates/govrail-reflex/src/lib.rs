//! Reflex system (C5): lifecycle FSM, sliding-window triggers, per-target
//! circuit breaker, and the action dispatcher that wires trigger breaches
//! to lifecycle transitions.

pub mod circuit_breaker;
pub mod dispatcher;
pub mod lifecycle;
pub mod triggers;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
pub use dispatcher::{dispatch, requires_manual_confirm, TriggerClass};
pub use lifecycle::JobLifecycle;
pub use triggers::{BudgetViolationTrigger, ErrorRateTrigger};

use std::sync::Mutex;

use govrail_types::{GovrailError, GovrailResult, JobLifecycleState, ReflexAction, ReflexActionType};
use tracing::{error, info};

/// Aggregates the reflex subsystems behind one entrypoint: feed it outcomes
/// and budget violations, it runs the relevant trigger, dispatches the
/// resulting action, and applies it to the lifecycle FSM.
pub struct ReflexService {
    pub lifecycle: JobLifecycle,
    pub circuit_breakers: CircuitBreakerRegistry,
    error_rate: Mutex<ErrorRateTrigger>,
    budget_burst: Mutex<BudgetViolationTrigger>,
    default_cooldown_ms: u64,
}

impl ReflexService {
    pub fn new(
        error_rate: ErrorRateTrigger,
        budget_burst: BudgetViolationTrigger,
        circuit_breaker_config: CircuitBreakerConfig,
        default_cooldown_ms: u64,
    ) -> Self {
        Self {
            lifecycle: JobLifecycle::new(),
            circuit_breakers: CircuitBreakerRegistry::new(circuit_breaker_config),
            error_rate: Mutex::new(error_rate),
            budget_burst: Mutex::new(budget_burst),
            default_cooldown_ms,
        }
    }

    /// Records an attempt outcome against the error-rate trigger; on
    /// breach, suspends the job.
    pub async fn record_outcome(&self, job_id: &str, success: bool) -> GovrailResult<Option<ReflexAction>> {
        let event = {
            let mut trigger = self.error_rate.lock().expect("error rate trigger poisoned");
            trigger.record(job_id, !success)
        };
        let Some(event) = event else { return Ok(None) };

        let mut action = dispatch(TriggerClass::ErrorRateBreach, &event, self.default_cooldown_ms);
        self.lifecycle
            .suspend(job_id, action.cooldown_ms, action.reason.clone())
            .await
            .map_err(Self::as_action_failed)?;
        action.result = Some("suspended".to_string());
        info!(job_id, "reflex suspended job after error rate breach");
        Ok(Some(action))
    }

    /// Records a budget violation; on burst breach, throttles the job.
    pub async fn record_budget_violation(&self, job_id: &str) -> GovrailResult<Option<ReflexAction>> {
        let event = {
            let mut trigger = self.budget_burst.lock().expect("budget violation trigger poisoned");
            trigger.record_violation(job_id)
        };
        let Some(event) = event else { return Ok(None) };

        let mut action = dispatch(TriggerClass::BudgetViolationBurst, &event, self.default_cooldown_ms);
        self.lifecycle
            .throttle(job_id, action.cooldown_ms, action.reason.clone())
            .await
            .map_err(Self::as_action_failed)?;
        action.result = Some("throttled".to_string());
        Ok(Some(action))
    }

    /// Wraps an FSM rejection as `REFLEX_ACTION_FAILED`: the action itself
    /// could not be applied, distinct from the raw lifecycle error.
    fn as_action_failed(err: GovrailError) -> GovrailError {
        GovrailError::ReflexActionFailed {
            detail: err.to_string(),
        }
    }

    /// Critical anomalies never change lifecycle state; they only alert and
    /// flag the job for manual confirmation on future decisions.
    pub fn raise_critical_anomaly(&self, job_id: &str, reason: impl Into<String>) -> ReflexAction {
        let event = govrail_types::TriggerEvent {
            trigger_id: "critical-anomaly".to_string(),
            target_job_id: job_id.to_string(),
            metric_value: 1.0,
            threshold: 1.0,
            reason: reason.into(),
        };
        error!(job_id, "critical anomaly raised, manual confirmation required");
        let mut action = dispatch(TriggerClass::CriticalAnomaly, &event, 0);
        action.result = Some("alerted".to_string());
        action
    }

    pub async fn cancel_unrecoverable(&self, job_id: &str, reason: impl Into<String>) -> GovrailResult<JobLifecycleState> {
        self.lifecycle
            .cancel(job_id, reason, govrail_types::TriggeredBy::Reflex)
            .await
            .map_err(Self::as_action_failed)
    }
}
