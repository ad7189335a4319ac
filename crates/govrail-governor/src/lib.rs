//! C3 — Decision Evaluator.
//!
//! Deterministic: the same `DecisionContext` against the same `Manifest`
//! always produces the same `mode`, `recovery_strategy`, and numeric
//! budget fields (Testable Properties §8, law 7).

use std::collections::HashMap;

use chrono::Utc;
use govrail_types::{
    Budget, BudgetResolution, BudgetSource, DecisionContext, Environment, GovernorDecision,
    HealthImpact, Manifest, ManifestRule, Mode, RecoveryStrategy, RuleCondition,
};
use tracing::debug;

pub struct DecisionEvaluator<'m> {
    manifest: &'m Manifest,
    sorted_rules: Vec<&'m ManifestRule>,
}

impl<'m> DecisionEvaluator<'m> {
    pub fn new(manifest: &'m Manifest) -> Self {
        Self {
            manifest,
            sorted_rules: manifest.rules_by_priority(),
        }
    }

    pub fn evaluate(&self, context: &DecisionContext, shadow_mode: bool) -> GovernorDecision {
        let fields = context.as_field_map();

        let (matched_rule, matched_rule_ids) = self.find_matching_rule(&fields);

        let (mode, recovery_strategy, reason) = match matched_rule {
            Some(rule) => {
                let recovery = rule.recovery_strategy.unwrap_or_else(|| {
                    context
                        .risk_class
                        .as_ref()
                        .and_then(|name| self.manifest.risk_classes.get(name))
                        .map(|rc| rc.default_recovery_strategy)
                        .unwrap_or(RecoveryStrategy::Retry)
                });
                (rule.mode, recovery, rule.reason.clone())
            }
            None => (Mode::Direct, RecoveryStrategy::Retry, "defaults".to_string()),
        };

        let budget_resolution = self.resolve_budget(context, matched_rule);

        let immune_alert_required = recovery_strategy == RecoveryStrategy::ManualConfirm
            || (mode == Mode::Rail && context.environment == Environment::Production)
            || context.uses_personal_data;

        let health_impact = match recovery_strategy {
            RecoveryStrategy::ManualConfirm => HealthImpact::High,
            _ if mode == Mode::Rail => HealthImpact::Medium,
            _ => HealthImpact::Low,
        };

        debug!(
            job_id = %context.job_id,
            mode = ?mode,
            rules_matched = matched_rule_ids.len(),
            "decision evaluated"
        );

        GovernorDecision {
            mission_id: context.mission_id.clone(),
            plan_id: context.plan_id.clone(),
            job_id: context.job_id.clone(),
            attempt_id: None,
            mode,
            budget_resolution,
            recovery_strategy,
            manifest_id: self.manifest.manifest_id.clone(),
            manifest_version: self.manifest.version,
            triggered_rules: matched_rule_ids,
            reason,
            shadow_mode,
            evidence: HashMap::new(),
            immune_alert_required,
            health_impact,
            persisted_at: Utc::now(),
            degraded: false,
        }
    }

    fn find_matching_rule(
        &self,
        fields: &HashMap<String, serde_json::Value>,
    ) -> (Option<&'m ManifestRule>, Vec<String>) {
        for rule in &self.sorted_rules {
            if !rule.enabled {
                continue;
            }
            if evaluate_condition(&rule.when, fields) {
                return (Some(rule), vec![rule.rule_id.clone()]);
            }
        }
        (None, Vec::new())
    }

    fn resolve_budget(
        &self,
        context: &DecisionContext,
        matched_rule: Option<&'m ManifestRule>,
    ) -> BudgetResolution {
        let (mut budget, source, rule_id) = if let Some(job_override) =
            self.manifest.job_overrides.get(&context.job_type)
        {
            (
                job_override.layered_over(&self.manifest.budget_defaults),
                BudgetSource::JobOverride,
                None,
            )
        } else if let Some(rule) = matched_rule {
            if let Some(rule_budget) = &rule.budget_override {
                (
                    rule_budget.layered_over(&self.manifest.budget_defaults),
                    BudgetSource::RuleOverride,
                    Some(rule.rule_id.clone()),
                )
            } else {
                (self.manifest.budget_defaults.clone(), BudgetSource::Defaults, None)
            }
        } else {
            (self.manifest.budget_defaults.clone(), BudgetSource::Defaults, None)
        };

        let mut multiplier_applied = None;
        if let Some(risk_class_name) = &context.risk_class {
            if let Some(risk_class) = self.manifest.risk_classes.get(risk_class_name) {
                if (risk_class.budget_multiplier - 1.0).abs() > f64::EPSILON {
                    budget = budget.with_multiplier(risk_class.budget_multiplier);
                    multiplier_applied = Some(risk_class.budget_multiplier);
                }
            }
        }

        BudgetResolution {
            budget,
            source,
            rule_id,
            multiplier_applied,
        }
    }
}

fn evaluate_condition(condition: &RuleCondition, fields: &HashMap<String, serde_json::Value>) -> bool {
    match condition {
        RuleCondition::Any { any } => any.iter().any(|c| evaluate_condition(c, fields)),
        RuleCondition::All { all } => all.iter().all(|c| evaluate_condition(c, fields)),
        RuleCondition::Fields(map) => map.iter().all(|(key, expected)| {
            fields.get(key).map(|actual| actual == expected).unwrap_or(false)
        }),
    }
}

/// Budget fields actually used when computing divergence between an active
/// and shadow decision — unused so far outside the activation gate, kept
/// here because the evaluator is the only place that knows how to produce
/// two decisions for the same context.
pub fn decisions_diverge(active: &GovernorDecision, shadow: &GovernorDecision) -> (bool, f64) {
    let mode_differs = active.mode != shadow.mode;
    let ratio = budget_ratio(&active.budget_resolution.budget, &shadow.budget_resolution.budget);
    (mode_differs, ratio)
}

fn budget_ratio(a: &Budget, b: &Budget) -> f64 {
    match (a.timeout_ms, b.timeout_ms) {
        (Some(a), Some(b)) if a > 0 => (b as f64) / (a as f64),
        _ => 1.0,
    }
}
