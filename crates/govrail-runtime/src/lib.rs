//! The governed execution runtime: the single explicit service object that
//! wires C1 (identity/trace) through C9 (RBAC) together, per Design Notes
//! §9's "explicit long-lived service object instead of hidden globals."
//!
//! This crate owns no business-domain logic; it is the plumbing that
//! makes a job attempt flow through decision evaluation, budget
//! enforcement, reflex observation, audit, and SSE fan-out in the order
//! the specification requires.

pub mod decisions;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use govrail_audit::AuditLog;
use govrail_enforcement::{GuardStack, RetryConfig};
use govrail_executor::Orchestrator;
use govrail_governor::DecisionEvaluator;
use govrail_identity::TraceRegistry;
use govrail_manifest::gate::{Divergence, ShadowReport};
use govrail_manifest::ManifestRegistry;
use govrail_rbac::{Decision as RbacDecision, RbacService, User};
use govrail_reflex::ReflexService;
use govrail_sse::{SsePublisher, SsePublisherConfig, Subscription, SubscriptionFilter};
use govrail_types::{
    ActivationGateConfig, Attempt, AttemptId, AttemptStatus, AuditCategory, AuditEvent,
    DecisionContext, EventChannel, GovrailError, GovrailResult, Job, JobId,
    Manifest, Mission, MissionId, Plan, PlanId, PlanType, RuntimeConfig, Severity, StreamEvent,
    TraceChain, TraceIds,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use decisions::DecisionStore;

/// Aggregates C1-C9 behind one entrypoint. Cheaply cloneable: every field
/// is itself a cheap-clone handle (`Arc`-backed or internally `Arc`ed),
/// so cloning a `GovrailRuntime` is the idiomatic way to hand a reference
/// to it across tasks without threading lifetimes through the call stack.
#[derive(Clone)]
pub struct GovrailRuntime {
    pub config: Arc<RuntimeConfig>,
    pub trace: TraceRegistry,
    pub manifests: ManifestRegistry,
    pub audit: Arc<AuditLog>,
    pub sse: Arc<SsePublisher>,
    pub rbac: Arc<RbacService>,
    pub reflex: Arc<ReflexService>,
    pub guards: Arc<GuardStack>,
    pub executor: Arc<Orchestrator>,
    pub decisions: Arc<DecisionStore>,
}

impl GovrailRuntime {
    pub fn new(config: RuntimeConfig, executor: Orchestrator) -> Self {
        let guards = GuardStack::new(config.max_global_parallel, RetryConfig::default());
        let sse = SsePublisher::new(SsePublisherConfig {
            buffer_size: config.sse_buffer_size,
            queue_capacity: config.sse_buffer_size.max(64) * 4,
            max_consecutive_drops: config.sse_max_consecutive_drops,
        });
        Self {
            config: Arc::new(config),
            trace: TraceRegistry::new(),
            manifests: ManifestRegistry::new(),
            audit: Arc::new(AuditLog::new()),
            sse: Arc::new(sse),
            rbac: Arc::new(RbacService::new()),
            reflex: Arc::new(ReflexService::new(
                govrail_reflex::ErrorRateTrigger::new("error-rate", 0.5, 60, 0, 3),
                govrail_reflex::BudgetViolationTrigger::new("budget-burst", 5, 60, 60_000),
                govrail_reflex::CircuitBreakerConfig::default(),
                60_000,
            )),
            guards: Arc::new(guards),
            executor: Arc::new(executor),
            decisions: Arc::new(DecisionStore::new()),
        }
    }

    // ---- C1: identity/trace ------------------------------------------------

    pub async fn submit_mission(&self, title: &str, goal: &str, tags: HashMap<String, String>) -> Mission {
        let mission = self.trace.new_mission(title, goal, tags).await;
        self.record_audit(
            TraceIds { mission_id: Some(mission.mission_id.to_string()), ..Default::default() },
            AuditCategory::System,
            Severity::Low,
            "mission.submitted",
            serde_json::json!({ "title": mission.title }),
        );
        mission
    }

    pub async fn new_plan(&self, mission_id: MissionId, plan_type: PlanType) -> GovrailResult<Plan> {
        self.trace.new_plan(mission_id, plan_type).await
    }

    pub async fn new_job(
        &self,
        plan_id: PlanId,
        job_type: &str,
        depends_on: std::collections::HashSet<JobId>,
        rollback_possible: bool,
    ) -> GovrailResult<Job> {
        self.trace.new_job(plan_id, job_type, depends_on, rollback_possible).await
    }

    pub async fn get_trace(&self, attempt_id: &AttemptId) -> GovrailResult<TraceChain> {
        self.trace.trace(attempt_id).await
    }

    // ---- C2: manifest registry ---------------------------------------------

    pub async fn create_manifest(&self, manifest: Manifest, validate_chain: bool) -> GovrailResult<Manifest> {
        self.manifests.create(manifest, validate_chain).await
    }

    pub async fn set_shadow(&self, version: u64) -> GovrailResult<Manifest> {
        self.manifests.set_shadow(version).await
    }

    pub async fn activate_manifest(
        &self,
        version: u64,
        gate_config: &ActivationGateConfig,
        force: bool,
    ) -> GovrailResult<Manifest> {
        let report = self.build_shadow_report(gate_config).await;
        let activated = self
            .manifests
            .activate(version, gate_config, report.as_ref(), force)
            .await?;
        self.record_audit(
            TraceIds::default(),
            AuditCategory::Governance,
            Severity::Medium,
            "manifest.activated",
            serde_json::json!({ "version": version, "forced": force }),
        );
        self.publish(EventChannel::Governor, "manifest.activated", serde_json::json!({ "version": version }));
        Ok(activated)
    }

    /// Builds a `ShadowReport` from every recorded active/shadow decision
    /// pair. §4.3 notes the source compares top-level decisions only; this
    /// mirrors that by comparing mode and the timeout-budget ratio.
    async fn build_shadow_report(&self, gate_config: &ActivationGateConfig) -> Option<ShadowReport> {
        let pairs = self.decisions.all_pairs();
        if pairs.is_empty() {
            return None;
        }
        let observed_jobs = pairs.len() as u64;
        let divergences: Vec<Divergence> = pairs
            .iter()
            .filter_map(|pair| {
                let shadow = pair.shadow.as_ref()?;
                let (mode_differs, ratio) = govrail_governor::decisions_diverge(&pair.active, shadow);
                let is_production = matches!(
                    pair.active.mode,
                    govrail_types::Mode::Rail
                ) || pair.active.health_impact != govrail_types::HealthImpact::Low;
                if mode_differs || (ratio - 1.0).abs() > f64::EPSILON {
                    Some(Divergence {
                        job_type: pair.active.manifest_id.clone(),
                        mode_differs,
                        budget_ratio: ratio,
                        environment_is_production: is_production,
                    })
                } else {
                    None
                }
            })
            .collect();
        Some(ShadowReport::compute(divergences, observed_jobs, gate_config))
    }

    // ---- C9: RBAC -----------------------------------------------------------

    pub fn authorize(&self, user: &User, required: &[String], require_all: bool) -> RbacDecision {
        self.rbac.authorize(user, required, require_all)
    }

    // ---- C8: SSE --------------------------------------------------------------

    pub fn subscribe_stream(&self, filter: SubscriptionFilter, replay_n: usize) -> Subscription {
        self.sse.subscribe(filter, replay_n)
    }

    fn publish(&self, channel: EventChannel, event_type: &str, payload: serde_json::Value) {
        let mut data = HashMap::new();
        if let serde_json::Value::Object(map) = payload {
            for (k, v) in map {
                data.insert(k, v);
            }
        }
        self.sse.publish(StreamEvent::new(channel, event_type, data));
    }

    fn record_audit(
        &self,
        trace_ids: TraceIds,
        category: AuditCategory,
        severity: Severity,
        event_type: &str,
        payload: serde_json::Value,
    ) {
        let event = AuditEvent::new(trace_ids, category, severity, event_type, payload);
        if let Err(e) = self.audit.append(event) {
            warn!(error = %e, "audit append failed");
        }
    }

    // ---- The governed job-attempt flow (C3 -> C1 -> C4 -> C5) ---------------

    /// Evaluates a decision against the active manifest (and, if present,
    /// the shadow manifest for comparison), persists it, allocates an
    /// attempt, and runs `payload` under the resolved budget's guard stack.
    /// Outcomes are fed to the reflex system's error-rate trigger; a
    /// resulting SUSPEND/THROTTLE/CANCEL is applied to the job's lifecycle.
    pub async fn run_job_attempt<F, Fut, T>(
        &self,
        context: DecisionContext,
        payload: F,
    ) -> GovrailResult<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = GovrailResult<T>>,
    {
        let active = self.manifests.get_active().await.ok_or_else(|| GovrailError::ManifestNotFound { version: 0 })?;
        let evaluator = DecisionEvaluator::new(&active);
        let mut decision = evaluator.evaluate(&context, false);
        decision.degraded = self.audit.is_degraded();

        let shadow_decision = if let Some(shadow) = self.manifests.get_shadow().await {
            let shadow_evaluator = DecisionEvaluator::new(&shadow);
            Some(shadow_evaluator.evaluate(&context, true))
        } else {
            None
        };

        self.decisions.record(context.job_id.clone(), decision.clone(), shadow_decision);

        // Invariant 1: the decision must be persisted before the attempt starts.
        self.record_audit(
            TraceIds {
                mission_id: Some(context.mission_id.to_string()),
                plan_id: Some(context.plan_id.to_string()),
                job_id: Some(context.job_id.to_string()),
                attempt_id: None,
            },
            AuditCategory::Governance,
            Severity::Low,
            "governor.decision",
            serde_json::json!({
                "mode": format!("{:?}", decision.mode),
                "source": format!("{:?}", decision.budget_resolution.source),
                "triggered_rules": decision.triggered_rules,
            }),
        );
        self.publish(
            EventChannel::Governor,
            "governor.decision",
            serde_json::json!({
                "job_id": context.job_id.to_string(),
                "mode": format!("{:?}", decision.mode),
            }),
        );

        let attempt = self.trace.new_attempt(context.job_id.clone()).await?;
        self.reflex.lifecycle.start(context.job_id.as_str()).await.ok();

        let budget = decision.budget_resolution.budget.clone();
        let job_id_str = context.job_id.clone();
        let result = self
            .guards
            .run(attempt.attempt_id.clone(), context.job_id.clone(), &budget, payload)
            .await;

        let success = result.is_ok();
        self.finish_attempt(&attempt, success).await;
        self.observe_outcome(job_id_str.as_str(), success, &result).await;

        result
    }

    async fn finish_attempt(&self, attempt: &Attempt, success: bool) {
        let status = if success { AttemptStatus::Completed } else { AttemptStatus::Failed };
        if let Err(e) = self.trace.finish_attempt(&attempt.attempt_id, status).await {
            warn!(error = %e, "failed to finalize attempt status");
        }
        self.record_audit(
            TraceIds {
                job_id: Some(attempt.job_id.to_string()),
                attempt_id: Some(attempt.attempt_id.to_string()),
                ..Default::default()
            },
            AuditCategory::Enforcement,
            if success { Severity::Low } else { Severity::Medium },
            "attempt.finished",
            serde_json::json!({ "status": format!("{status:?}") }),
        );
    }

    async fn observe_outcome<T>(&self, job_id: &str, success: bool, result: &GovrailResult<T>) {
        if let Err(e) = result {
            if matches!(
                e,
                GovrailError::BudgetCostExceeded
                    | GovrailError::BudgetParallelismExceeded { .. }
                    | GovrailError::ExecOverbudget
            ) {
                let _ = self.reflex.record_budget_violation(job_id).await;
            }
        }
        match self.reflex.record_outcome(job_id, success).await {
            Ok(Some(action)) => {
                info!(job_id, action = ?action.action_type, "reflex action applied");
                self.publish(
                    EventChannel::Reflex,
                    "reflex.action",
                    serde_json::json!({
                        "job_id": job_id,
                        "action_type": format!("{:?}", action.action_type),
                        "reason": action.reason,
                    }),
                );
                self.record_audit(
                    TraceIds { job_id: Some(job_id.to_string()), ..Default::default() },
                    AuditCategory::Reflex,
                    Severity::Medium,
                    "reflex.action",
                    serde_json::json!({ "action_type": format!("{:?}", action.action_type) }),
                );
            }
            Ok(None) => {}
            Err(e) => warn!(job_id, error = %e, "reflex action application failed"),
        }
    }
}
