//! The activation gate: decides whether a shadow manifest may become
//! active (§4.2).

use govrail_types::{ActivationGateConfig, Manifest};
use serde::{Deserialize, Serialize};

/// A single observed divergence between the active and shadow decision for
/// the same job context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Divergence {
    pub job_type: String,
    pub mode_differs: bool,
    pub budget_ratio: f64,
    pub environment_is_production: bool,
}

impl Divergence {
    /// A "critical" divergence: differing mode, or a >2x budget swing on a
    /// production job type.
    pub fn is_critical(&self, threshold: f64) -> bool {
        self.mode_differs || (self.environment_is_production && self.budget_ratio > threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowReport {
    pub observed_jobs: u64,
    pub divergent_jobs: u64,
    pub divergences: Vec<Divergence>,
    pub safe_to_activate: bool,
}

impl ShadowReport {
    pub fn compute(divergences: Vec<Divergence>, observed_jobs: u64, config: &ActivationGateConfig) -> Self {
        let divergent_jobs = divergences.len() as u64;
        let divergence_pct = if observed_jobs == 0 {
            0.0
        } else {
            (divergent_jobs as f64 / observed_jobs as f64) * 100.0
        };
        let has_critical = divergences
            .iter()
            .any(|d| d.is_critical(config.critical_budget_multiplier_threshold));
        let safe_to_activate = divergence_pct <= config.divergence_max_pct && !has_critical;
        Self {
            observed_jobs,
            divergent_jobs,
            divergences,
            safe_to_activate,
        }
    }
}

/// Pure evaluation of the gate policy: shadow duration plus the report's
/// verdict. Does not itself mutate any registry state.
pub fn gate_allows_activation(
    manifest: &Manifest,
    config: &ActivationGateConfig,
    shadow_report: Option<&ShadowReport>,
    force: bool,
) -> Result<(), String> {
    if force {
        return Ok(());
    }
    let shadow_start = manifest
        .shadow_start
        .ok_or_else(|| "manifest has never been in shadow mode".to_string())?;
    let elapsed_ms = (chrono::Utc::now() - shadow_start).num_milliseconds().max(0) as u64;
    if elapsed_ms < config.shadow_min_duration_ms {
        return Err(format!(
            "shadow duration {elapsed_ms}ms below minimum {}ms",
            config.shadow_min_duration_ms
        ));
    }
    let report = shadow_report.ok_or_else(|| "no shadow report available".to_string())?;
    if !report.safe_to_activate {
        return Err("shadow report marks manifest unsafe to activate".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_unsafe_when_divergence_exceeds_threshold() {
        let config = ActivationGateConfig::default();
        let divergences: Vec<Divergence> = (0..10)
            .map(|i| Divergence {
                job_type: format!("job_{i}"),
                mode_differs: false,
                budget_ratio: 1.0,
                environment_is_production: false,
            })
            .collect();
        let report = ShadowReport::compute(divergences, 100, &config);
        assert!(!report.safe_to_activate);
    }

    #[test]
    fn critical_divergence_blocks_even_under_threshold() {
        let config = ActivationGateConfig::default();
        let divergences = vec![Divergence {
            job_type: "payment_job".into(),
            mode_differs: true,
            budget_ratio: 1.0,
            environment_is_production: true,
        }];
        let report = ShadowReport::compute(divergences, 1000, &config);
        assert!(!report.safe_to_activate);
    }

    #[test]
    fn force_bypasses_every_check() {
        use chrono::Utc;
        use std::collections::HashMap;
        let manifest = Manifest {
            manifest_id: "m".into(),
            version: 1,
            created_at: Utc::now(),
            hash_prev: None,
            hash_self: "h".into(),
            effective_at: None,
            shadow_mode: true,
            shadow_start: None,
            rules: vec![],
            budget_defaults: Default::default(),
            risk_classes: HashMap::new(),
            job_overrides: HashMap::new(),
            metadata: HashMap::new(),
        };
        assert!(gate_allows_activation(&manifest, &ActivationGateConfig::default(), None, true).is_ok());
    }
}
