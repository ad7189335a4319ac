//! Execution entities (C5, C6): lifecycle FSM states, circuit breaker
//! states, reflex actions, and the DAG step/plan model driven by the
//! executor orchestrator.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobLifecycleState {
    Pending,
    Running,
    Suspended,
    Throttled,
    Completed,
    Failed,
    Cancelled,
}

impl JobLifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobLifecycleState::Completed | JobLifecycleState::Failed | JobLifecycleState::Cancelled
        )
    }

    /// The allowed-transition table from §4.5, verbatim.
    pub fn allowed_targets(self) -> &'static [JobLifecycleState] {
        use JobLifecycleState::*;
        match self {
            Pending => &[Running, Cancelled],
            Running => &[Suspended, Throttled, Completed, Failed, Cancelled],
            Suspended => &[Running, Cancelled],
            Throttled => &[Running, Suspended, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: JobLifecycleState) -> bool {
        self.allowed_targets().contains(&target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggeredBy {
    Reflex,
    Manual,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleTransition {
    pub from: JobLifecycleState,
    pub to: JobLifecycleState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub triggered_by: TriggeredBy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_id: String,
    pub target_job_id: String,
    pub metric_value: f64,
    pub threshold: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReflexActionType {
    Suspend,
    Throttle,
    Alert,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflexAction {
    pub action_type: ReflexActionType,
    pub target_job: String,
    pub cooldown_ms: u64,
    pub reason: String,
    pub result: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Idempotent,
    Rollbackable,
    Atomic,
    Resumable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: String,
    pub sequence: u32,
    pub name: String,
    pub executor_type: String,
    pub parameters: HashMap<String, serde_json::Value>,
    pub depends_on: HashSet<String>,
    pub rollback_possible: bool,
    pub rollback_steps: Vec<String>,
    pub capabilities: HashSet<Capability>,
    pub status: StepStatus,
    pub result: Option<serde_json::Value>,
    pub evidence_path: Option<String>,
}

impl ExecutionStep {
    pub fn new(
        step_id: impl Into<String>,
        sequence: u32,
        name: impl Into<String>,
        executor_type: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            sequence,
            name: name.into(),
            executor_type: executor_type.into(),
            parameters: HashMap::new(),
            depends_on: HashSet::new(),
            rollback_possible: false,
            rollback_steps: Vec::new(),
            capabilities: HashSet::new(),
            status: StepStatus::Pending,
            result: None,
            evidence_path: None,
        }
    }

    pub fn requires_network(&self) -> bool {
        self.parameters
            .get("requires_network")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Validated,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessPlan {
    pub plan_id: String,
    pub steps: Vec<ExecutionStep>,
    pub status: PlanStatus,
}

impl BusinessPlan {
    pub fn new(plan_id: impl Into<String>, steps: Vec<ExecutionStep>) -> Self {
        Self {
            plan_id: plan_id.into(),
            steps,
            status: PlanStatus::Planning,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut ExecutionStep> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Steps ready to execute: not yet completed, and every dependency is
    /// COMPLETED.
    pub fn next_runnable_steps(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Pending))
            .filter(|s| {
                s.depends_on.iter().all(|dep| {
                    self.step(dep)
                        .map(|d| d.status == StepStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .map(|s| s.step_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transition_table_matches_fsm() {
        assert!(JobLifecycleState::Pending.can_transition_to(JobLifecycleState::Running));
        assert!(!JobLifecycleState::Pending.can_transition_to(JobLifecycleState::Completed));
        assert!(JobLifecycleState::Suspended.can_transition_to(JobLifecycleState::Running));
        assert!(!JobLifecycleState::Completed.can_transition_to(JobLifecycleState::Running));
    }

    #[test]
    fn next_runnable_steps_respects_dependencies() {
        let mut step1 = ExecutionStep::new("s1", 1, "first", "noop");
        step1.status = StepStatus::Completed;
        let mut step2 = ExecutionStep::new("s2", 2, "second", "noop");
        step2.depends_on.insert("s1".into());
        let plan = BusinessPlan::new("p1", vec![step1, step2]);
        assert_eq!(plan.next_runnable_steps(), vec!["s2".to_string()]);
    }
}
