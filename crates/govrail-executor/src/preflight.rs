//! Preflight: four named checks run before a plan's first step, mirroring
//! disk space / templates / output directory / network from the original
//! checker one-for-one, generalized to this runtime's domain.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use govrail_types::BusinessPlan;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct PreflightResult {
    pub passed: bool,
    pub checks: Vec<CheckResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct PreflightConfig {
    pub state_dir: PathBuf,
    pub required_free_bytes: u64,
    pub known_resources: HashSet<String>,
    pub network_probe: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./govrail-state"),
            required_free_bytes: 1024 * 1024,
            known_resources: HashSet::new(),
            network_probe: None,
        }
    }
}

pub struct PreflightChecker {
    config: PreflightConfig,
}

impl PreflightChecker {
    pub fn new(config: PreflightConfig) -> Self {
        Self { config }
    }

    pub async fn check_prerequisites(&self, plan: &BusinessPlan) -> PreflightResult {
        info!(plan_id = %plan.plan_id, "running preflight checks");

        let mut checks = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let check = self.check_disk_space();
        if !check.passed {
            errors.push(check.message.clone());
        }
        checks.push(check);

        let check = self.check_resources(plan);
        if !check.passed {
            errors.push(check.message.clone());
        }
        checks.push(check);

        let check = self.check_output_directory();
        if !check.passed {
            errors.push(check.message.clone());
        }
        checks.push(check);

        if requires_network(plan) {
            let check = self.check_network();
            if !check.passed {
                warnings.push(check.message.clone());
            }
            checks.push(check);
        }

        let passed = errors.is_empty();
        if passed {
            info!(checks = checks.len(), "preflight passed");
        } else {
            error!(errors = errors.len(), warnings = warnings.len(), "preflight failed");
        }

        PreflightResult { passed, checks, errors, warnings }
    }

    fn check_disk_space(&self) -> CheckResult {
        let scratch = self.config.state_dir.join(".preflight_space_probe");
        match write_scratch_file(&self.config.state_dir, &scratch, self.config.required_free_bytes) {
            Ok(()) => CheckResult {
                name: "disk_space",
                passed: true,
                message: format!("able to allocate {} bytes in {}", self.config.required_free_bytes, self.config.state_dir.display()),
            },
            Err(e) => CheckResult {
                name: "disk_space",
                passed: false,
                message: format!("insufficient disk space in {}: {e}", self.config.state_dir.display()),
            },
        }
    }

    fn check_resources(&self, plan: &BusinessPlan) -> CheckResult {
        let mut missing = Vec::new();
        for step in &plan.steps {
            if let Some(resource_id) = step.parameters.get("resource_id").and_then(|v| v.as_str()) {
                if !self.config.known_resources.contains(resource_id) {
                    missing.push(resource_id.to_string());
                }
            }
        }
        if missing.is_empty() {
            CheckResult {
                name: "resources",
                passed: true,
                message: "all referenced resources available".to_string(),
            }
        } else {
            CheckResult {
                name: "resources",
                passed: false,
                message: format!("missing resources: {}", missing.join(", ")),
            }
        }
    }

    fn check_output_directory(&self) -> CheckResult {
        let test_file = self.config.state_dir.join(".write_test");
        match write_scratch_file(&self.config.state_dir, &test_file, 4) {
            Ok(()) => CheckResult {
                name: "output_directory",
                passed: true,
                message: format!("output directory writable: {}", self.config.state_dir.display()),
            },
            Err(e) => CheckResult {
                name: "output_directory",
                passed: false,
                message: format!("output directory not writable: {e}"),
            },
        }
    }

    fn check_network(&self) -> CheckResult {
        let ok = self.config.network_probe.as_ref().map(|probe| probe()).unwrap_or(true);
        if ok {
            CheckResult { name: "network", passed: true, message: "network connectivity verified".to_string() }
        } else {
            warn!("network preflight check failed (warning only)");
            CheckResult { name: "network", passed: false, message: "network connectivity failed".to_string() }
        }
    }
}

fn write_scratch_file(dir: &Path, file: &Path, bytes: u64) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(file, vec![0u8; bytes.min(4096) as usize])?;
    std::fs::remove_file(file)?;
    Ok(())
}

/// Network is required only if some step's executor declares it, never a
/// hardcoded set of executor kinds.
fn requires_network(plan: &BusinessPlan) -> bool {
    plan.steps.iter().any(|s| s.requires_network())
}

#[cfg(test)]
mod tests {
    use super::*;
    use govrail_types::ExecutionStep;

    #[tokio::test]
    async fn passes_when_resources_and_directory_are_available() {
        let dir = std::env::temp_dir().join(format!("govrail-preflight-{}", uuid::Uuid::new_v4()));
        let config = PreflightConfig {
            state_dir: dir.clone(),
            ..Default::default()
        };
        let checker = PreflightChecker::new(config);
        let plan = BusinessPlan::new("p1", vec![ExecutionStep::new("s1", 1, "s1", "noop")]);
        let result = checker.check_prerequisites(&plan).await;
        assert!(result.passed);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_resource_fails_as_hard_error() {
        let dir = std::env::temp_dir().join(format!("govrail-preflight-{}", uuid::Uuid::new_v4()));
        let config = PreflightConfig {
            state_dir: dir.clone(),
            ..Default::default()
        };
        let checker = PreflightChecker::new(config);
        let mut step = ExecutionStep::new("s1", 1, "s1", "noop");
        step.parameters.insert("resource_id".to_string(), serde_json::json!("tpl-missing"));
        let plan = BusinessPlan::new("p1", vec![step]);
        let result = checker.check_prerequisites(&plan).await;
        assert!(!result.passed);
        assert_eq!(result.errors.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_network_check_is_a_warning_not_an_error() {
        let dir = std::env::temp_dir().join(format!("govrail-preflight-{}", uuid::Uuid::new_v4()));
        let config = PreflightConfig {
            state_dir: dir.clone(),
            network_probe: Some(Arc::new(|| false)),
            ..Default::default()
        };
        let checker = PreflightChecker::new(config);
        let mut step = ExecutionStep::new("s1", 1, "s1", "http");
        step.parameters.insert("requires_network".to_string(), serde_json::json!(true));
        let plan = BusinessPlan::new("p1", vec![step]);
        let result = checker.check_prerequisites(&plan).await;
        assert!(result.passed);
        assert_eq!(result.warnings.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
