//! Job lifecycle FSM: enforces the allowed-transition table from
//! `JobLifecycleState`, records transition history, and tracks
//! suspend/throttle cooldowns.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use govrail_types::{GovrailError, GovrailResult, JobLifecycleState, LifecycleTransition, TriggeredBy};
use tokio::sync::RwLock;
use tracing::{info, warn};

struct JobState {
    current: JobLifecycleState,
    entered_at: DateTime<Utc>,
    cooldown_until: Option<DateTime<Utc>>,
    transitions: Vec<LifecycleTransition>,
}

impl JobState {
    fn new() -> Self {
        Self {
            current: JobLifecycleState::Pending,
            entered_at: Utc::now(),
            cooldown_until: None,
            transitions: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct JobLifecycle {
    jobs: RwLock<HashMap<String, JobState>>,
}

impl JobLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_state(&self, job_id: &str) -> JobLifecycleState {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|s| s.current).unwrap_or(JobLifecycleState::Pending)
    }

    pub async fn get_state_duration(&self, job_id: &str) -> Option<StdDuration> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id)
            .and_then(|s| (Utc::now() - s.entered_at).to_std().ok())
    }

    pub async fn history(&self, job_id: &str) -> Vec<LifecycleTransition> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|s| s.transitions.clone()).unwrap_or_default()
    }

    /// Time-in-state counters across all known jobs, keyed by current state.
    pub async fn metrics(&self) -> HashMap<JobLifecycleState, u64> {
        let jobs = self.jobs.read().await;
        let mut counts = HashMap::new();
        for state in jobs.values() {
            *counts.entry(state.current).or_insert(0u64) += 1;
        }
        counts
    }

    async fn transition(
        &self,
        job_id: &str,
        to: JobLifecycleState,
        reason: impl Into<String>,
        triggered_by: TriggeredBy,
        cooldown_until: Option<DateTime<Utc>>,
    ) -> GovrailResult<JobLifecycleState> {
        let mut jobs = self.jobs.write().await;
        let state = jobs.entry(job_id.to_string()).or_insert_with(JobState::new);
        let from = state.current;

        if !from.can_transition_to(to) {
            warn!(job_id, ?from, ?to, "illegal lifecycle transition");
            return Err(GovrailError::ReflexLifecycleInvalid {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            });
        }

        state.transitions.push(LifecycleTransition {
            from,
            to,
            timestamp: Utc::now(),
            reason: reason.into(),
            triggered_by,
        });
        state.current = to;
        state.entered_at = Utc::now();
        state.cooldown_until = cooldown_until;
        info!(job_id, ?from, ?to, ?triggered_by, "lifecycle transition");
        Ok(to)
    }

    pub async fn start(&self, job_id: &str) -> GovrailResult<JobLifecycleState> {
        self.transition(job_id, JobLifecycleState::Running, "started", TriggeredBy::System, None)
            .await
    }

    pub async fn complete(&self, job_id: &str) -> GovrailResult<JobLifecycleState> {
        self.transition(job_id, JobLifecycleState::Completed, "completed", TriggeredBy::System, None)
            .await
    }

    pub async fn fail(&self, job_id: &str, reason: impl Into<String>) -> GovrailResult<JobLifecycleState> {
        self.transition(job_id, JobLifecycleState::Failed, reason, TriggeredBy::System, None)
            .await
    }

    pub async fn cancel(&self, job_id: &str, reason: impl Into<String>, triggered_by: TriggeredBy) -> GovrailResult<JobLifecycleState> {
        self.transition(job_id, JobLifecycleState::Cancelled, reason, triggered_by, None)
            .await
    }

    pub async fn suspend(&self, job_id: &str, cooldown_ms: u64, reason: impl Into<String>) -> GovrailResult<JobLifecycleState> {
        let until = Utc::now() + chrono::Duration::milliseconds(cooldown_ms as i64);
        self.transition(job_id, JobLifecycleState::Suspended, reason, TriggeredBy::Reflex, Some(until))
            .await
    }

    pub async fn throttle(&self, job_id: &str, cooldown_ms: u64, reason: impl Into<String>) -> GovrailResult<JobLifecycleState> {
        let until = Utc::now() + chrono::Duration::milliseconds(cooldown_ms as i64);
        self.transition(job_id, JobLifecycleState::Throttled, reason, TriggeredBy::Reflex, Some(until))
            .await
    }

    /// A no-op (not an error) returning the current state when called
    /// before cooldown expiry and `force=false`. `force=true` bypasses the
    /// cooldown check but remains subject to the FSM's transition table.
    pub async fn resume(&self, job_id: &str, reason: impl Into<String>, force: bool) -> GovrailResult<JobLifecycleState> {
        let still_cooling = {
            let jobs = self.jobs.read().await;
            jobs.get(job_id)
                .and_then(|s| s.cooldown_until)
                .map(|until| Utc::now() < until)
                .unwrap_or(false)
        };

        if still_cooling && !force {
            return Ok(self.get_state(job_id).await);
        }

        self.transition(job_id, JobLifecycleState::Running, reason, TriggeredBy::System, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn illegal_transition_fails_reflex_lifecycle_invalid() {
        let lifecycle = JobLifecycle::new();
        let err = lifecycle.complete("job-1").await.unwrap_err();
        assert!(matches!(err, GovrailError::ReflexLifecycleInvalid { .. }));
    }

    #[tokio::test]
    async fn resume_before_cooldown_is_a_no_op_unless_forced() {
        let lifecycle = JobLifecycle::new();
        lifecycle.start("job-1").await.unwrap();
        lifecycle.suspend("job-1", 60_000, "error rate breach").await.unwrap();

        let state = lifecycle.resume("job-1", "too early", false).await.unwrap();
        assert_eq!(state, JobLifecycleState::Suspended);

        let state = lifecycle.resume("job-1", "forced", true).await.unwrap();
        assert_eq!(state, JobLifecycleState::Running);
    }

    #[tokio::test]
    async fn s6_suspend_then_resume_records_reflex_then_system_transitions() {
        let lifecycle = JobLifecycle::new();
        lifecycle.start("job-1").await.unwrap();
        lifecycle.suspend("job-1", 0, "error rate breach").await.unwrap();
        lifecycle.resume("job-1", "cooldown elapsed", false).await.unwrap();

        let history = lifecycle.history("job-1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].to, JobLifecycleState::Suspended);
        assert_eq!(history[1].triggered_by, TriggeredBy::Reflex);
        assert_eq!(history[2].to, JobLifecycleState::Running);
        assert_eq!(history[2].triggered_by, TriggeredBy::System);
    }
}
