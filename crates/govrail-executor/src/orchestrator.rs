//! The four-stage pipeline: validate, preflight, topological execution
//! with idempotency short-circuit, and (on failure) reverse-order rollback.

use std::collections::HashMap;
use std::sync::Arc;

use govrail_types::{BusinessPlan, Capability, ExecutionStep, GovrailError, GovrailResult, PlanStatus, StepStatus};
use tracing::{error, info, warn};

use crate::contract::{ExecutionContext, StepExecutor};
use crate::dag;
use crate::idempotency::{idempotency_key, IdempotencyCache};
use crate::preflight::{PreflightChecker, PreflightConfig, PreflightResult};

pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self { executors: HashMap::new() }
    }

    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(executor.executor_type().to_string(), executor);
    }

    pub fn known_types(&self) -> std::collections::HashSet<String> {
        self.executors.keys().cloned().collect()
    }

    fn get(&self, executor_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(executor_type).cloned()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    registry: ExecutorRegistry,
    preflight: PreflightChecker,
    idempotency: IdempotencyCache,
}

impl Orchestrator {
    pub fn new(registry: ExecutorRegistry, preflight_config: PreflightConfig) -> Self {
        Self {
            registry,
            preflight: PreflightChecker::new(preflight_config),
            idempotency: IdempotencyCache::new(),
        }
    }

    pub async fn validate(&self, plan: &BusinessPlan) -> GovrailResult<()> {
        dag::validate(plan, &self.registry.known_types())
    }

    pub async fn run_preflight(&self, plan: &BusinessPlan) -> PreflightResult {
        self.preflight.check_prerequisites(plan).await
    }

    /// Runs every step of `plan` in dependency order. On the first step
    /// failure, rolls back completed steps in reverse sequence order (when
    /// `auto_rollback`) and marks the plan `RolledBack`; otherwise leaves it
    /// `Failed`.
    pub async fn execute_plan(&self, plan: &mut BusinessPlan, auto_rollback: bool) -> GovrailResult<()> {
        self.execute_plan_inner(plan, auto_rollback, false).await
    }

    /// Same pipeline, but every step only runs `validate_input` and is
    /// immediately marked `completed` with no executor invocation — used to
    /// check a plan is well-formed without any side effect.
    pub async fn dry_run_plan(&self, plan: &mut BusinessPlan) -> GovrailResult<()> {
        self.execute_plan_inner(plan, false, true).await
    }

    async fn execute_plan_inner(
        &self,
        plan: &mut BusinessPlan,
        auto_rollback: bool,
        dry_run: bool,
    ) -> GovrailResult<()> {
        self.validate(plan).await?;

        let preflight = self.run_preflight(plan).await;
        if !preflight.passed {
            plan.status = PlanStatus::Failed;
            error!(plan_id = %plan.plan_id, errors = ?preflight.errors, "preflight failed, aborting plan");
            return Err(GovrailError::ManifestInvalidSchema {
                detail: format!("preflight failed: {}", preflight.errors.join("; ")),
            });
        }

        plan.status = PlanStatus::Executing;
        info!(plan_id = %plan.plan_id, "executing plan");

        loop {
            let runnable = plan.next_runnable_steps();
            if runnable.is_empty() {
                break;
            }

            for step_id in runnable {
                if let Err(e) = self.execute_step(plan, &step_id, dry_run).await {
                    warn!(plan_id = %plan.plan_id, step_id, error = %e, "step failed");
                    if let Some(step) = plan.step_mut(&step_id) {
                        step.status = StepStatus::Failed;
                    }
                    plan.status = PlanStatus::Failed;

                    if auto_rollback {
                        self.rollback_plan(plan).await;
                    }
                    return Err(e);
                }
            }
        }

        let all_completed = plan.steps.iter().all(|s| s.status == StepStatus::Completed);
        plan.status = if all_completed { PlanStatus::Completed } else { PlanStatus::Failed };
        info!(plan_id = %plan.plan_id, status = ?plan.status, "plan execution finished");
        Ok(())
    }

    async fn execute_step(&self, plan: &mut BusinessPlan, step_id: &str, dry_run: bool) -> GovrailResult<()> {
        let step = plan.step(step_id).cloned().ok_or_else(|| GovrailError::ManifestInvalidSchema {
            detail: format!("unknown step {step_id}"),
        })?;

        let executor = self.registry.get(&step.executor_type).ok_or_else(|| GovrailError::ManifestInvalidSchema {
            detail: format!("no executor registered for type {}", step.executor_type),
        })?;

        let ctx = ExecutionContext {
            plan_id: plan.plan_id.clone(),
            step_id: step.step_id.clone(),
            dry_run,
        };

        executor.validate_input(&step).await?;

        if dry_run {
            info!(step_id, "dry run: validation only, no executor invocation");
            if let Some(mutable) = plan.step_mut(step_id) {
                mutable.status = StepStatus::Completed;
                mutable.result = Some(serde_json::json!({"dry_run": true}));
            }
            return Ok(());
        }

        let key = idempotency_key(&step);
        let idempotent = step.capabilities.contains(&Capability::Idempotent);

        let outcome = if idempotent {
            if let Some(cached) = self.idempotency.get(&key) {
                info!(step_id, "idempotency hit, skipping re-execution");
                cached
            } else {
                let fresh = executor.execute(&step, &ctx).await?;
                self.idempotency.put(key, fresh.clone());
                fresh
            }
        } else {
            executor.execute(&step, &ctx).await?
        };

        if let Some(mutable) = plan.step_mut(step_id) {
            mutable.status = StepStatus::Completed;
            mutable.result = outcome.data;
            mutable.evidence_path = outcome.evidence_path;
        }
        Ok(())
    }

    /// Reverses sequence order over completed steps; skips steps that
    /// aren't rollback-possible and continues past per-step rollback
    /// failures rather than aborting the walk.
    pub async fn rollback_plan(&self, plan: &mut BusinessPlan) {
        info!(plan_id = %plan.plan_id, "rolling back plan");
        let mut completed: Vec<ExecutionStep> = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        for step in completed {
            if !step.rollback_possible {
                warn!(step_id = %step.step_id, "step is not rollback-possible, skipping");
                continue;
            }
            let Some(executor) = self.registry.get(&step.executor_type) else {
                warn!(step_id = %step.step_id, "no executor registered for rollback");
                continue;
            };
            let ctx = ExecutionContext {
                plan_id: plan.plan_id.clone(),
                step_id: step.step_id.clone(),
                dry_run: false,
            };
            if let Err(e) = executor.rollback(&step, &ctx).await {
                error!(step_id = %step.step_id, error = %e, "rollback failed, continuing with remaining steps");
                continue;
            }
            if let Some(mutable) = plan.step_mut(&step.step_id) {
                mutable.status = StepStatus::RolledBack;
            }
        }

        plan.status = PlanStatus::RolledBack;
    }
}
