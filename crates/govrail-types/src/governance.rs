//! Governance entities (C2, C3): Budget, RiskClass, Manifest, and the
//! decision the evaluator produces for a single job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AttemptId, JobId, MissionId, PlanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Direct,
    Rail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    Retry,
    ManualConfirm,
    Fail,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Dev,
    Staging,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthImpact {
    Low,
    Medium,
    High,
}

/// All fields optional: a budget is a partial override over whatever it is
/// layered on top of. `merge` lets a more specific budget (job override,
/// rule override) fill in only what it actually specifies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub max_parallel_attempts: Option<u32>,
    pub max_global_parallel: Option<u32>,
    pub max_llm_tokens: Option<u64>,
    pub max_cost_credits: Option<u64>,
    pub grace_period_ms: Option<u64>,
}

impl Budget {
    /// Fields present on `self` take precedence; anything absent falls back
    /// to `base`.
    pub fn layered_over(&self, base: &Budget) -> Budget {
        Budget {
            timeout_ms: self.timeout_ms.or(base.timeout_ms),
            max_retries: self.max_retries.or(base.max_retries),
            max_parallel_attempts: self.max_parallel_attempts.or(base.max_parallel_attempts),
            max_global_parallel: self.max_global_parallel.or(base.max_global_parallel),
            max_llm_tokens: self.max_llm_tokens.or(base.max_llm_tokens),
            max_cost_credits: self.max_cost_credits.or(base.max_cost_credits),
            grace_period_ms: self.grace_period_ms.or(base.grace_period_ms),
        }
    }

    /// Applies a risk multiplier to every field *except* `max_retries` and
    /// `grace_period_ms`, which are explicitly excluded from risk scaling.
    pub fn with_multiplier(&self, multiplier: f64) -> Budget {
        if (multiplier - 1.0).abs() < f64::EPSILON {
            return self.clone();
        }
        Budget {
            timeout_ms: self.timeout_ms.map(|v| scale_u64(v, multiplier)),
            max_retries: self.max_retries,
            max_parallel_attempts: self.max_parallel_attempts.map(|v| scale_u32(v, multiplier)),
            max_global_parallel: self.max_global_parallel.map(|v| scale_u32(v, multiplier)),
            max_llm_tokens: self.max_llm_tokens.map(|v| scale_u64(v, multiplier)),
            max_cost_credits: self.max_cost_credits.map(|v| scale_u64(v, multiplier)),
            grace_period_ms: self.grace_period_ms,
        }
    }
}

fn scale_u64(v: u64, multiplier: f64) -> u64 {
    ((v as f64) * multiplier).round() as u64
}

fn scale_u32(v: u32, multiplier: f64) -> u32 {
    ((v as f64) * multiplier).round() as u32
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskClass {
    pub name: String,
    pub budget_multiplier: f64,
    pub default_recovery_strategy: RecoveryStrategy,
}

/// A `when` condition on a rule: a flat field-map (AND of all fields), or a
/// boolean combinator over nested conditions. Nesting is allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleCondition {
    Any { any: Vec<RuleCondition> },
    All { all: Vec<RuleCondition> },
    Fields(HashMap<String, serde_json::Value>),
}

impl RuleCondition {
    pub fn is_structurally_empty(&self) -> bool {
        match self {
            RuleCondition::Any { any } => any.is_empty(),
            RuleCondition::All { all } => all.is_empty(),
            RuleCondition::Fields(map) => map.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRule {
    pub rule_id: String,
    pub priority: i64,
    pub enabled: bool,
    pub when: RuleCondition,
    pub mode: Mode,
    pub budget_override: Option<Budget>,
    pub recovery_strategy: Option<RecoveryStrategy>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_id: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub hash_prev: Option<String>,
    pub hash_self: String,
    pub effective_at: Option<DateTime<Utc>>,
    pub shadow_mode: bool,
    pub shadow_start: Option<DateTime<Utc>>,
    pub rules: Vec<ManifestRule>,
    pub budget_defaults: Budget,
    pub risk_classes: HashMap<String, RiskClass>,
    pub job_overrides: HashMap<String, Budget>,
    pub metadata: HashMap<String, String>,
}

impl Manifest {
    /// Rules sorted by ascending priority (lower = higher precedence), as
    /// required on load.
    pub fn rules_by_priority(&self) -> Vec<&ManifestRule> {
        let mut rules: Vec<&ManifestRule> = self.rules.iter().collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetSource {
    JobOverride,
    RuleOverride,
    Defaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetResolution {
    pub budget: Budget,
    pub source: BudgetSource,
    pub rule_id: Option<String>,
    pub multiplier_applied: Option<f64>,
}

/// Configuration for the manifest activation gate (§4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationGateConfig {
    pub shadow_min_duration_ms: u64,
    pub divergence_max_pct: f64,
    pub critical_budget_multiplier_threshold: f64,
}

impl Default for ActivationGateConfig {
    fn default() -> Self {
        Self {
            shadow_min_duration_ms: 24 * 60 * 60 * 1000,
            divergence_max_pct: 5.0,
            critical_budget_multiplier_threshold: 2.0,
        }
    }
}

/// The input to the decision evaluator for a single job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub mission_id: MissionId,
    pub plan_id: PlanId,
    pub job_id: JobId,
    pub job_type: String,
    pub environment: Environment,
    pub risk_class: Option<String>,
    pub idempotent: bool,
    pub external_dependency: bool,
    pub uses_personal_data: bool,
    pub extra_fields: HashMap<String, serde_json::Value>,
}

impl DecisionContext {
    /// Field-map view used by rule matching: named fields plus whatever
    /// extra fields the caller attached, merged so that condition matching
    /// can treat them uniformly.
    pub fn as_field_map(&self) -> HashMap<String, serde_json::Value> {
        let mut map = self.extra_fields.clone();
        map.insert("job_type".into(), serde_json::json!(self.job_type));
        map.insert(
            "environment".into(),
            serde_json::json!(match self.environment {
                Environment::Dev => "dev",
                Environment::Staging => "staging",
                Environment::Production => "production",
            }),
        );
        if let Some(rc) = &self.risk_class {
            map.insert("risk_class".into(), serde_json::json!(rc));
        }
        map.insert("idempotent".into(), serde_json::json!(self.idempotent));
        map.insert(
            "external_dependency".into(),
            serde_json::json!(self.external_dependency),
        );
        map.insert(
            "uses_personal_data".into(),
            serde_json::json!(self.uses_personal_data),
        );
        map
    }
}

/// Immutable per-job outcome produced by the decision evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorDecision {
    pub mission_id: MissionId,
    pub plan_id: PlanId,
    pub job_id: JobId,
    pub attempt_id: Option<AttemptId>,
    pub mode: Mode,
    pub budget_resolution: BudgetResolution,
    pub recovery_strategy: RecoveryStrategy,
    pub manifest_id: String,
    pub manifest_version: u64,
    pub triggered_rules: Vec<String>,
    pub reason: String,
    pub shadow_mode: bool,
    pub evidence: HashMap<String, serde_json::Value>,
    pub immune_alert_required: bool,
    pub health_impact: HealthImpact,
    pub persisted_at: DateTime<Utc>,
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_layering_prefers_more_specific_fields() {
        let job_override = Budget {
            timeout_ms: Some(10_000),
            ..Default::default()
        };
        let defaults = Budget {
            timeout_ms: Some(30_000),
            max_retries: Some(3),
            ..Default::default()
        };
        let resolved = job_override.layered_over(&defaults);
        assert_eq!(resolved.timeout_ms, Some(10_000));
        assert_eq!(resolved.max_retries, Some(3));
    }

    #[test]
    fn multiplier_skips_retries_and_grace_period() {
        let budget = Budget {
            timeout_ms: Some(30_000),
            max_retries: Some(3),
            grace_period_ms: Some(500),
            ..Default::default()
        };
        let scaled = budget.with_multiplier(2.0);
        assert_eq!(scaled.timeout_ms, Some(60_000));
        assert_eq!(scaled.max_retries, Some(3));
        assert_eq!(scaled.grace_period_ms, Some(500));
    }
}
