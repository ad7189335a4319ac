//! Action dispatcher: maps a trigger breach class to the `ReflexAction` it
//! produces, per the fixed trigger-class table.

use govrail_types::{ReflexAction, ReflexActionType, TriggerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerClass {
    ErrorRateBreach,
    BudgetViolationBurst,
    CriticalAnomaly,
    Unrecoverable,
}

/// `critical anomaly` never changes lifecycle state; the caller is expected
/// to additionally mark the decision as requiring manual confirmation.
pub fn dispatch(class: TriggerClass, event: &TriggerEvent, default_cooldown_ms: u64) -> ReflexAction {
    let action_type = match class {
        TriggerClass::ErrorRateBreach => ReflexActionType::Suspend,
        TriggerClass::BudgetViolationBurst => ReflexActionType::Throttle,
        TriggerClass::CriticalAnomaly => ReflexActionType::Alert,
        TriggerClass::Unrecoverable => ReflexActionType::Cancel,
    };

    let cooldown_ms = match class {
        TriggerClass::CriticalAnomaly | TriggerClass::Unrecoverable => 0,
        _ => default_cooldown_ms,
    };

    ReflexAction {
        action_type,
        target_job: event.target_job_id.clone(),
        cooldown_ms,
        reason: event.reason.clone(),
        result: None,
    }
}

/// `critical anomaly` requires the governor to mark subsequent decisions
/// for this job as needing manual confirmation, on top of the ALERT action.
pub fn requires_manual_confirm(class: TriggerClass) -> bool {
    class == TriggerClass::CriticalAnomaly
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> TriggerEvent {
        TriggerEvent {
            trigger_id: "t-1".into(),
            target_job_id: "job-1".into(),
            metric_value: 0.6,
            threshold: 0.5,
            reason: "error rate breach".into(),
        }
    }

    #[test]
    fn error_rate_breach_maps_to_suspend() {
        let action = dispatch(TriggerClass::ErrorRateBreach, &sample_event(), 60_000);
        assert_eq!(action.action_type, ReflexActionType::Suspend);
        assert_eq!(action.cooldown_ms, 60_000);
    }

    #[test]
    fn budget_violation_burst_maps_to_throttle() {
        let action = dispatch(TriggerClass::BudgetViolationBurst, &sample_event(), 30_000);
        assert_eq!(action.action_type, ReflexActionType::Throttle);
    }

    #[test]
    fn critical_anomaly_alerts_without_state_change_and_requires_confirm() {
        let action = dispatch(TriggerClass::CriticalAnomaly, &sample_event(), 60_000);
        assert_eq!(action.action_type, ReflexActionType::Alert);
        assert!(requires_manual_confirm(TriggerClass::CriticalAnomaly));
        assert!(!requires_manual_confirm(TriggerClass::ErrorRateBreach));
    }

    #[test]
    fn unrecoverable_maps_to_cancel() {
        let action = dispatch(TriggerClass::Unrecoverable, &sample_event(), 60_000);
        assert_eq!(action.action_type, ReflexActionType::Cancel);
    }
}
