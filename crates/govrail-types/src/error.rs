//! Error taxonomy shared by every component.
//!
//! Each variant carries a stable string code, a category, a severity, and a
//! `retriable` flag, mirroring the metadata table a caller needs to decide
//! whether to retry, alert, or simply propagate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Mechanical,
    Ethical,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GovrailError {
    #[error("payload exceeded timeout_ms")]
    ExecTimeout,
    #[error("generic resource budget exceeded")]
    ExecOverbudget,
    #[error("max_llm_tokens or max_cost_credits crossed")]
    BudgetCostExceeded,
    #[error("parallelism semaphore full: {limit_type}")]
    BudgetParallelismExceeded { limit_type: String },
    #[error("all retries used: {last_error}")]
    RetryExhausted { last_error: String },
    #[error("downstream error: {detail}")]
    UpstreamUnavailable { detail: String },
    #[error("malformed upstream reply: {detail}")]
    BadResponseFormat { detail: String },
    #[error("blocked by reflex cooldown until {cooldown_until}")]
    PolicyReflexCooldown { cooldown_until: i64 },
    #[error("missing parent in trace chain: {detail}")]
    OrphanKilled { detail: String },
    #[error("circuit breaker open for target {target}")]
    CircuitBreakerOpen { target: String },
    #[error("illegal lifecycle transition: {from} -> {to}")]
    ReflexLifecycleInvalid { from: String, to: String },
    #[error("reflex action could not be applied: {detail}")]
    ReflexActionFailed { detail: String },
    #[error("manifest not found: {version}")]
    ManifestNotFound { version: u64 },
    #[error("manifest hash chain mismatch: hash_prev={hash_prev}")]
    ManifestHashMismatch { hash_prev: String },
    #[error("manifest failed schema validation: {detail}")]
    ManifestInvalidSchema { detail: String },
    #[error("activation gate blocked: {reason}")]
    ActivationGateBlocked { reason: String },
    #[error("audit log write failed: {detail}")]
    AuditLogFailure { detail: String },
    #[error("telemetry publish failed: {detail}")]
    TelemetryFailure { detail: String },
    #[error("required trace ids absent: {detail}")]
    MissingTraceContext { detail: String },
}

impl GovrailError {
    pub fn code(&self) -> &'static str {
        match self {
            GovrailError::ExecTimeout => "EXEC_TIMEOUT",
            GovrailError::ExecOverbudget => "EXEC_OVERBUDGET",
            GovrailError::BudgetCostExceeded => "BUDGET_COST_EXCEEDED",
            GovrailError::BudgetParallelismExceeded { .. } => "BUDGET_PARALLELISM_EXCEEDED",
            GovrailError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            GovrailError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            GovrailError::BadResponseFormat { .. } => "BAD_RESPONSE_FORMAT",
            GovrailError::PolicyReflexCooldown { .. } => "POLICY_REFLEX_COOLDOWN",
            GovrailError::OrphanKilled { .. } => "ORPHAN_KILLED",
            GovrailError::CircuitBreakerOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            GovrailError::ReflexLifecycleInvalid { .. } => "REFLEX_LIFECYCLE_INVALID",
            GovrailError::ReflexActionFailed { .. } => "REFLEX_ACTION_FAILED",
            GovrailError::ManifestNotFound { .. } => "MANIFEST_NOT_FOUND",
            GovrailError::ManifestHashMismatch { .. } => "MANIFEST_HASH_MISMATCH",
            GovrailError::ManifestInvalidSchema { .. } => "MANIFEST_INVALID_SCHEMA",
            GovrailError::ActivationGateBlocked { .. } => "ACTIVATION_GATE_BLOCKED",
            GovrailError::AuditLogFailure { .. } => "AUDIT_LOG_FAILURE",
            GovrailError::TelemetryFailure { .. } => "TELEMETRY_FAILURE",
            GovrailError::MissingTraceContext { .. } => "MISSING_TRACE_CONTEXT",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        use GovrailError::*;
        match self {
            ExecTimeout
            | ExecOverbudget
            | BudgetCostExceeded
            | BudgetParallelismExceeded { .. }
            | RetryExhausted { .. }
            | UpstreamUnavailable { .. }
            | BadResponseFormat { .. }
            | PolicyReflexCooldown { .. }
            | OrphanKilled { .. } => ErrorCategory::Mechanical,
            CircuitBreakerOpen { .. }
            | ReflexLifecycleInvalid { .. }
            | ReflexActionFailed { .. }
            | ManifestNotFound { .. }
            | ManifestHashMismatch { .. }
            | ManifestInvalidSchema { .. }
            | ActivationGateBlocked { .. }
            | AuditLogFailure { .. }
            | TelemetryFailure { .. }
            | MissingTraceContext { .. } => ErrorCategory::System,
        }
    }

    /// Whether `RetryHandler` should treat this as a candidate for retry.
    /// Budget-exceeded kinds are mechanical but explicitly excluded: the cap
    /// itself was the problem, not a transient condition.
    pub fn retriable(&self) -> bool {
        use GovrailError::*;
        match self {
            ExecTimeout | ExecOverbudget | BudgetCostExceeded | RetryExhausted { .. }
            | OrphanKilled { .. } => false,
            BudgetParallelismExceeded { .. } | UpstreamUnavailable { .. } | BadResponseFormat { .. } => {
                true
            }
            PolicyReflexCooldown { .. } => true,
            CircuitBreakerOpen { .. } => true,
            ReflexLifecycleInvalid { .. }
            | ReflexActionFailed { .. }
            | ManifestNotFound { .. }
            | ManifestHashMismatch { .. }
            | ManifestInvalidSchema { .. }
            | ActivationGateBlocked { .. }
            | AuditLogFailure { .. }
            | TelemetryFailure { .. }
            | MissingTraceContext { .. } => false,
        }
    }

    pub fn severity(&self) -> Severity {
        use GovrailError::*;
        match self {
            ExecTimeout | ExecOverbudget | BudgetCostExceeded | BudgetParallelismExceeded { .. } => {
                Severity::Medium
            }
            RetryExhausted { .. } | UpstreamUnavailable { .. } | BadResponseFormat { .. } => {
                Severity::Medium
            }
            PolicyReflexCooldown { .. } => Severity::Low,
            OrphanKilled { .. } => Severity::High,
            CircuitBreakerOpen { .. } => Severity::Medium,
            ReflexLifecycleInvalid { .. } | ReflexActionFailed { .. } => Severity::High,
            ManifestNotFound { .. } | ManifestHashMismatch { .. } | ManifestInvalidSchema { .. } => {
                Severity::High
            }
            ActivationGateBlocked { .. } => Severity::Medium,
            AuditLogFailure { .. } => Severity::Critical,
            TelemetryFailure { .. } => Severity::Low,
            MissingTraceContext { .. } => Severity::High,
        }
    }

    pub fn is_mechanical(&self) -> bool {
        self.category() == ErrorCategory::Mechanical
    }
}

pub type GovrailResult<T> = Result<T, GovrailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_cost_exceeded_is_never_retriable() {
        assert!(!GovrailError::BudgetCostExceeded.retriable());
        assert_eq!(GovrailError::BudgetCostExceeded.category(), ErrorCategory::Mechanical);
    }

    #[test]
    fn parallelism_exceeded_is_retriable_and_mechanical() {
        let err = GovrailError::BudgetParallelismExceeded { limit_type: "global".into() };
        assert!(err.retriable());
        assert_eq!(err.category(), ErrorCategory::Mechanical);
        assert_eq!(err.code(), "BUDGET_PARALLELISM_EXCEEDED");
    }

    #[test]
    fn audit_log_failure_is_critical_and_system() {
        let err = GovrailError::AuditLogFailure { detail: "disk full".into() };
        assert_eq!(err.severity(), Severity::Critical);
        assert_eq!(err.category(), ErrorCategory::System);
        assert!(!err.retriable());
    }
}
