//! C1 — Identity & Trace.
//!
//! Owns the arena tables for Mission/Plan/Job/Attempt entities (Design
//! Notes §9: cyclic object graphs become arena + typed-ID references) and
//! is the only place that allocates new entities and validates parent
//! chains.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use govrail_types::{
    Attempt, AttemptId, AttemptStatus, GovrailError, GovrailResult, Job, JobId, Mission, MissionId,
    Plan, PlanId, PlanType, TraceChain,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
struct Tables {
    missions: HashMap<MissionId, Mission>,
    plans: HashMap<PlanId, Plan>,
    jobs: HashMap<JobId, Job>,
    attempts: HashMap<AttemptId, Attempt>,
}

/// The stateful service backing C1. Cheaply cloneable; all clones share the
/// same underlying tables.
#[derive(Clone)]
pub struct TraceRegistry {
    inner: Arc<RwLock<Tables>>,
}

impl Default for TraceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Tables::default())),
        }
    }

    pub async fn new_mission(&self, title: &str, goal: &str, tags: HashMap<String, String>) -> Mission {
        let mission = Mission::new(title, goal, tags);
        let mut tables = self.inner.write().await;
        debug!(mission_id = %mission.mission_id, "mission created");
        tables.missions.insert(mission.mission_id.clone(), mission.clone());
        mission
    }

    pub async fn new_plan(&self, mission_id: MissionId, plan_type: PlanType) -> GovrailResult<Plan> {
        let tables = self.inner.read().await;
        if !tables.missions.contains_key(&mission_id) {
            warn!(%mission_id, "plan rejected: unknown mission");
            return Err(GovrailError::OrphanKilled {
                detail: format!("plan references unknown mission {mission_id}"),
            });
        }
        drop(tables);
        let plan = Plan::new(mission_id, plan_type);
        let mut tables = self.inner.write().await;
        tables.plans.insert(plan.plan_id.clone(), plan.clone());
        Ok(plan)
    }

    pub async fn new_job(
        &self,
        plan_id: PlanId,
        job_type: &str,
        depends_on: HashSet<JobId>,
        rollback_possible: bool,
    ) -> GovrailResult<Job> {
        let tables = self.inner.read().await;
        if !tables.plans.contains_key(&plan_id) {
            warn!(%plan_id, "job rejected: unknown plan");
            return Err(GovrailError::OrphanKilled {
                detail: format!("job references unknown plan {plan_id}"),
            });
        }
        for dep in &depends_on {
            if !tables.jobs.contains_key(dep) {
                warn!(%plan_id, dep = %dep, "job rejected: unknown dependency");
                return Err(GovrailError::OrphanKilled {
                    detail: format!("job depends on unknown job {dep}"),
                });
            }
        }
        drop(tables);
        let job = Job::new(plan_id, job_type, depends_on, rollback_possible);
        let mut tables = self.inner.write().await;
        tables.jobs.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    pub async fn new_attempt(&self, job_id: JobId) -> GovrailResult<Attempt> {
        let tables = self.inner.read().await;
        if !tables.jobs.contains_key(&job_id) {
            warn!(%job_id, "attempt rejected: unknown job");
            return Err(GovrailError::OrphanKilled {
                detail: format!("attempt references unknown job {job_id}"),
            });
        }
        let attempt_number = tables
            .attempts
            .values()
            .filter(|a| a.job_id == job_id)
            .count() as u32
            + 1;
        drop(tables);
        let attempt = Attempt::new(job_id, attempt_number);
        let mut tables = self.inner.write().await;
        tables.attempts.insert(attempt.attempt_id.clone(), attempt.clone());
        Ok(attempt)
    }

    pub async fn finish_attempt(&self, attempt_id: &AttemptId, status: AttemptStatus) -> GovrailResult<()> {
        let mut tables = self.inner.write().await;
        let attempt = tables
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| GovrailError::MissingTraceContext {
                detail: format!("unknown attempt {attempt_id}"),
            })?;
        attempt.finish(status);
        Ok(())
    }

    /// Reconstructs the full trace chain starting from an attempt ID.
    pub async fn trace(&self, attempt_id: &AttemptId) -> GovrailResult<TraceChain> {
        let tables = self.inner.read().await;
        let attempt = tables
            .attempts
            .get(attempt_id)
            .ok_or_else(|| GovrailError::MissingTraceContext {
                detail: format!("unknown attempt {attempt_id}"),
            })?
            .clone();
        self.trace_from_job(&tables, &attempt.job_id, Some(attempt))
    }

    /// Reconstructs the trace chain starting from any level of the
    /// hierarchy (mission, plan, job, or attempt id).
    pub async fn reconstruct_from_job(&self, job_id: &JobId) -> GovrailResult<TraceChain> {
        let tables = self.inner.read().await;
        self.trace_from_job(&tables, job_id, None)
    }

    /// Reconstructs the trace chain for every job under `plan_id`. A plan
    /// with no jobs yet yields an empty vec rather than an error.
    pub async fn reconstruct_from_plan(&self, plan_id: &PlanId) -> GovrailResult<Vec<TraceChain>> {
        let tables = self.inner.read().await;
        if !tables.plans.contains_key(plan_id) {
            return Err(GovrailError::MissingTraceContext {
                detail: format!("unknown plan {plan_id}"),
            });
        }
        tables
            .jobs
            .values()
            .filter(|job| &job.plan_id == plan_id)
            .map(|job| self.trace_from_job(&tables, &job.job_id, None))
            .collect()
    }

    /// Reconstructs the trace chain for every job under every plan of
    /// `mission_id`.
    pub async fn reconstruct_from_mission(&self, mission_id: &MissionId) -> GovrailResult<Vec<TraceChain>> {
        let tables = self.inner.read().await;
        if !tables.missions.contains_key(mission_id) {
            return Err(GovrailError::MissingTraceContext {
                detail: format!("unknown mission {mission_id}"),
            });
        }
        tables
            .jobs
            .values()
            .filter(|job| {
                tables
                    .plans
                    .get(&job.plan_id)
                    .map(|plan| &plan.mission_id == mission_id)
                    .unwrap_or(false)
            })
            .map(|job| self.trace_from_job(&tables, &job.job_id, None))
            .collect()
    }

    fn trace_from_job(
        &self,
        tables: &Tables,
        job_id: &JobId,
        attempt: Option<Attempt>,
    ) -> GovrailResult<TraceChain> {
        let job = tables
            .jobs
            .get(job_id)
            .ok_or_else(|| GovrailError::MissingTraceContext {
                detail: format!("unknown job {job_id}"),
            })?
            .clone();
        let plan = tables
            .plans
            .get(&job.plan_id)
            .ok_or_else(|| GovrailError::MissingTraceContext {
                detail: format!("unknown plan {}", job.plan_id),
            })?
            .clone();
        let mission = tables
            .missions
            .get(&plan.mission_id)
            .ok_or_else(|| GovrailError::MissingTraceContext {
                detail: format!("unknown mission {}", plan.mission_id),
            })?
            .clone();
        Ok(TraceChain {
            mission,
            plan,
            job,
            attempt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdMap;

    #[tokio::test]
    async fn job_with_unknown_plan_is_orphan_killed() {
        let registry = TraceRegistry::new();
        let err = registry
            .new_job(PlanId::from("p_missing"), "data_collection", HashSet::new(), false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ORPHAN_KILLED");
    }

    #[tokio::test]
    async fn trace_reconstructs_full_chain_from_attempt() {
        let registry = TraceRegistry::new();
        let mission = registry.new_mission("title", "goal", StdMap::new()).await;
        let plan = registry
            .new_plan(mission.mission_id.clone(), PlanType::Sequential)
            .await
            .unwrap();
        let job = registry
            .new_job(plan.plan_id.clone(), "llm_call", HashSet::new(), false)
            .await
            .unwrap();
        let attempt = registry.new_attempt(job.job_id.clone()).await.unwrap();

        let chain = registry.trace(&attempt.attempt_id).await.unwrap();
        assert_eq!(chain.mission.mission_id, mission.mission_id);
        assert_eq!(chain.plan.plan_id, plan.plan_id);
        assert_eq!(chain.job.job_id, job.job_id);
        assert!(chain.attempt.is_some());
    }

    #[tokio::test]
    async fn reconstruct_from_mission_covers_every_job_across_plans() {
        let registry = TraceRegistry::new();
        let mission = registry.new_mission("t", "g", StdMap::new()).await;
        let plan_a = registry.new_plan(mission.mission_id.clone(), PlanType::Sequential).await.unwrap();
        let plan_b = registry.new_plan(mission.mission_id.clone(), PlanType::Dag).await.unwrap();
        registry.new_job(plan_a.plan_id.clone(), "job_a", HashSet::new(), false).await.unwrap();
        registry.new_job(plan_b.plan_id.clone(), "job_b", HashSet::new(), false).await.unwrap();

        let chains = registry.reconstruct_from_mission(&mission.mission_id).await.unwrap();
        assert_eq!(chains.len(), 2);
        assert!(chains.iter().all(|c| c.mission.mission_id == mission.mission_id));
    }

    #[tokio::test]
    async fn attempt_numbers_increment_per_job() {
        let registry = TraceRegistry::new();
        let mission = registry.new_mission("t", "g", StdMap::new()).await;
        let plan = registry
            .new_plan(mission.mission_id, PlanType::Dag)
            .await
            .unwrap();
        let job = registry
            .new_job(plan.plan_id, "data_collection", HashSet::new(), false)
            .await
            .unwrap();
        let a1 = registry.new_attempt(job.job_id.clone()).await.unwrap();
        let a2 = registry.new_attempt(job.job_id.clone()).await.unwrap();
        assert_eq!(a1.attempt_number, 1);
        assert_eq!(a2.attempt_number, 2);
    }
}
