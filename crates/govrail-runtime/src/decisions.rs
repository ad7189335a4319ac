//! The decision store adjacent to C3/C7: every `GovernorDecision` is
//! appended here before the attempt it governs is allowed to start
//! (Testable Properties §8, invariant 1), and shadow decisions are kept
//! alongside their active counterpart for the activation gate to compare.

use std::collections::HashMap;
use std::sync::RwLock;

use govrail_types::{GovernorDecision, JobId};

#[derive(Debug, Clone)]
pub struct DecisionPair {
    pub active: GovernorDecision,
    pub shadow: Option<GovernorDecision>,
}

#[derive(Default)]
pub struct DecisionStore {
    by_job: RwLock<HashMap<JobId, Vec<DecisionPair>>>,
}

impl DecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, job_id: JobId, active: GovernorDecision, shadow: Option<GovernorDecision>) {
        let mut by_job = self.by_job.write().expect("decision store poisoned");
        by_job.entry(job_id).or_default().push(DecisionPair { active, shadow });
    }

    pub fn latest_for_job(&self, job_id: &JobId) -> Option<DecisionPair> {
        let by_job = self.by_job.read().expect("decision store poisoned");
        by_job.get(job_id).and_then(|v| v.last().cloned())
    }

    pub fn all_for_job(&self, job_id: &JobId) -> Vec<DecisionPair> {
        let by_job = self.by_job.read().expect("decision store poisoned");
        by_job.get(job_id).cloned().unwrap_or_default()
    }

    /// All shadow/active pairs across every job, used to build a
    /// `ShadowReport` for the activation gate.
    pub fn all_pairs(&self) -> Vec<DecisionPair> {
        let by_job = self.by_job.read().expect("decision store poisoned");
        by_job.values().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use govrail_types::{Budget, BudgetResolution, BudgetSource, HealthImpact, Mode, MissionId, PlanId, RecoveryStrategy};
    use std::collections::HashMap as StdMap;

    fn decision(job_id: &JobId) -> GovernorDecision {
        GovernorDecision {
            mission_id: MissionId::new(),
            plan_id: PlanId::new(),
            job_id: job_id.clone(),
            attempt_id: None,
            mode: Mode::Direct,
            budget_resolution: BudgetResolution {
                budget: Budget::default(),
                source: BudgetSource::Defaults,
                rule_id: None,
                multiplier_applied: None,
            },
            recovery_strategy: RecoveryStrategy::Retry,
            manifest_id: "m1".into(),
            manifest_version: 1,
            triggered_rules: vec![],
            reason: "defaults".into(),
            shadow_mode: false,
            evidence: StdMap::new(),
            immune_alert_required: false,
            health_impact: HealthImpact::Low,
            persisted_at: Utc::now(),
            degraded: false,
        }
    }

    #[test]
    fn records_and_retrieves_latest_decision_per_job() {
        let store = DecisionStore::new();
        let job_id = JobId::new();
        store.record(job_id.clone(), decision(&job_id), None);
        store.record(job_id.clone(), decision(&job_id), None);
        assert_eq!(store.all_for_job(&job_id).len(), 2);
        assert!(store.latest_for_job(&job_id).is_some());
    }
}
