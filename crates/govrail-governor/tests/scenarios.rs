//! End-to-end scenario tests for the decision evaluator (Testable
//! Properties §8, S1-S3).

use chrono::Utc;
use govrail_governor::DecisionEvaluator;
use govrail_types::{
    Budget, BudgetSource, DecisionContext, Environment, HealthImpact, JobId, Manifest,
    ManifestRule, Mode, MissionId, PlanId, RecoveryStrategy, RiskClass, RuleCondition,
};
use std::collections::HashMap as StdMap;

fn manifest_with_defaults() -> Manifest {
    Manifest {
        manifest_id: "m1".into(),
        version: 1,
        created_at: Utc::now(),
        hash_prev: None,
        hash_self: "h".into(),
        effective_at: Some(Utc::now()),
        shadow_mode: false,
        shadow_start: None,
        rules: vec![],
        budget_defaults: Budget {
            timeout_ms: Some(30_000),
            max_retries: Some(3),
            ..Default::default()
        },
        risk_classes: StdMap::new(),
        job_overrides: StdMap::new(),
        metadata: StdMap::new(),
    }
}

fn context(job_type: &str) -> DecisionContext {
    DecisionContext {
        mission_id: MissionId::new(),
        plan_id: PlanId::new(),
        job_id: JobId::new(),
        job_type: job_type.into(),
        environment: Environment::Dev,
        risk_class: None,
        idempotent: true,
        external_dependency: false,
        uses_personal_data: false,
        extra_fields: StdMap::new(),
    }
}

/// S1 — deterministic decision, defaults.
#[test]
fn s1_defaults_when_no_rule_matches() {
    let manifest = manifest_with_defaults();
    let evaluator = DecisionEvaluator::new(&manifest);
    let decision = evaluator.evaluate(&context("data_collection"), false);
    assert_eq!(decision.mode, Mode::Direct);
    assert_eq!(decision.budget_resolution.budget.timeout_ms, Some(30_000));
    assert_eq!(decision.budget_resolution.source, BudgetSource::Defaults);
    assert!(decision.triggered_rules.is_empty());
    assert!(!decision.immune_alert_required);
    assert_eq!(decision.health_impact, HealthImpact::Low);
}

/// S2 — risk multiplier applied; max_retries unaffected.
#[test]
fn s2_risk_multiplier_scales_timeout_but_not_retries() {
    let mut manifest = manifest_with_defaults();
    manifest.risk_classes.insert(
        "critical".into(),
        RiskClass {
            name: "critical".into(),
            budget_multiplier: 2.0,
            default_recovery_strategy: RecoveryStrategy::Retry,
        },
    );
    let evaluator = DecisionEvaluator::new(&manifest);
    let mut ctx = context("data_collection");
    ctx.risk_class = Some("critical".into());
    let decision = evaluator.evaluate(&ctx, false);
    assert_eq!(decision.budget_resolution.budget.timeout_ms, Some(60_000));
    assert_eq!(decision.budget_resolution.multiplier_applied, Some(2.0));
    assert_eq!(decision.budget_resolution.budget.max_retries, Some(3));
}

/// S3 — job override beats rule override.
#[test]
fn s3_job_override_beats_rule_override() {
    let mut manifest = manifest_with_defaults();
    manifest.job_overrides.insert(
        "llm_call".into(),
        Budget {
            timeout_ms: Some(10_000),
            ..Default::default()
        },
    );
    manifest.rules.push(ManifestRule {
        rule_id: "r1".into(),
        priority: 1,
        enabled: true,
        when: RuleCondition::Fields(StdMap::from([(
            "job_type".to_string(),
            serde_json::json!("llm_call"),
        )])),
        mode: Mode::Direct,
        budget_override: Some(Budget {
            timeout_ms: Some(5_000),
            ..Default::default()
        }),
        recovery_strategy: None,
        reason: "llm rule".into(),
    });
    let evaluator = DecisionEvaluator::new(&manifest);
    let decision = evaluator.evaluate(&context("llm_call"), false);
    assert_eq!(decision.budget_resolution.budget.timeout_ms, Some(10_000));
    assert_eq!(decision.budget_resolution.source, BudgetSource::JobOverride);
}
