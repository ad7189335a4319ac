//! The manifest registry service (C2).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use govrail_types::{ActivationGateConfig, GovrailError, GovrailResult, Manifest, RuleCondition};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::gate::{gate_allows_activation, ShadowReport};
use crate::hash::compute_hash_self;

/// Finds a `risk_class` field named in a rule's `when` condition, if any,
/// so `create` can reject rules that reference a class absent from the
/// manifest's `risk_classes` map.
fn referenced_risk_class(condition: &RuleCondition) -> Option<&str> {
    match condition {
        RuleCondition::Any { any } | RuleCondition::All { all: any } => {
            any.iter().find_map(referenced_risk_class)
        }
        RuleCondition::Fields(map) => map.get("risk_class").and_then(|v| v.as_str()),
    }
}

struct State {
    by_version: HashMap<u64, Manifest>,
    active_version: Option<u64>,
    shadow_version: Option<u64>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            by_version: HashMap::new(),
            active_version: None,
            shadow_version: None,
        }
    }
}

#[derive(Clone)]
pub struct ManifestRegistry {
    inner: Arc<RwLock<State>>,
}

impl Default for ManifestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Creates a manifest. Computes `hash_self` if it is empty; validates
    /// the hash chain unless `validate_chain=false`. Manifests are
    /// immutable after create.
    pub async fn create(&self, mut manifest: Manifest, validate_chain: bool) -> GovrailResult<Manifest> {
        if manifest.hash_self.is_empty() {
            manifest.hash_self = compute_hash_self(&manifest);
        }
        if let Some(rule) = manifest.rules.iter().find(|r| r.when.is_structurally_empty()) {
            return Err(GovrailError::ManifestInvalidSchema {
                detail: format!("rule {} has an empty `when` condition", rule.rule_id),
            });
        }
        if let Some(unknown) = manifest
            .rules
            .iter()
            .find_map(|r| referenced_risk_class(&r.when).filter(|rc| !manifest.risk_classes.contains_key(*rc)))
        {
            return Err(GovrailError::ManifestInvalidSchema {
                detail: format!("rule references unknown risk_class `{unknown}`"),
            });
        }

        let mut state = self.inner.write().await;
        if validate_chain {
            if let Some(hash_prev) = &manifest.hash_prev {
                if !hash_prev.is_empty() {
                    let exists = state.by_version.values().any(|m| &m.hash_self == hash_prev);
                    if !exists {
                        warn!(version = manifest.version, %hash_prev, "manifest hash chain validation failed");
                        return Err(GovrailError::ManifestHashMismatch {
                            hash_prev: hash_prev.clone(),
                        });
                    }
                }
            }
        }
        info!(version = manifest.version, manifest_id = %manifest.manifest_id, "manifest created");
        state.by_version.insert(manifest.version, manifest.clone());
        Ok(manifest)
    }

    pub async fn get(&self, version: u64) -> Option<Manifest> {
        self.inner.read().await.by_version.get(&version).cloned()
    }

    pub async fn get_active(&self) -> Option<Manifest> {
        let state = self.inner.read().await;
        state
            .active_version
            .and_then(|v| state.by_version.get(&v).cloned())
    }

    pub async fn get_shadow(&self) -> Option<Manifest> {
        let state = self.inner.read().await;
        state
            .shadow_version
            .and_then(|v| state.by_version.get(&v).cloned())
    }

    pub async fn list(&self, limit: usize, offset: usize) -> Vec<Manifest> {
        let state = self.inner.read().await;
        let mut versions: Vec<&Manifest> = state.by_version.values().collect();
        versions.sort_by_key(|m| std::cmp::Reverse(m.version));
        versions
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn delete(&self, version: u64) -> GovrailResult<()> {
        let mut state = self.inner.write().await;
        if state.active_version == Some(version) {
            return Err(GovrailError::ManifestInvalidSchema {
                detail: "cannot delete the active manifest".into(),
            });
        }
        if state.shadow_version == Some(version) {
            return Err(GovrailError::ManifestInvalidSchema {
                detail: "cannot delete the shadow manifest".into(),
            });
        }
        if state.by_version.remove(&version).is_none() {
            return Err(GovrailError::ManifestNotFound { version });
        }
        Ok(())
    }

    pub async fn set_shadow(&self, version: u64) -> GovrailResult<Manifest> {
        let mut state = self.inner.write().await;
        let manifest = state
            .by_version
            .get_mut(&version)
            .ok_or(GovrailError::ManifestNotFound { version })?;
        manifest.shadow_mode = true;
        manifest.shadow_start = Some(Utc::now());
        state.shadow_version = Some(version);
        info!(version, "manifest set to shadow mode");
        Ok(state.by_version.get(&version).cloned().unwrap())
    }

    /// Activates a manifest, atomically demoting the currently active one
    /// to shadow. Requires the gate to allow it unless `force=true`.
    pub async fn activate(
        &self,
        version: u64,
        gate_config: &ActivationGateConfig,
        shadow_report: Option<&ShadowReport>,
        force: bool,
    ) -> GovrailResult<Manifest> {
        let mut state = self.inner.write().await;
        let candidate = state
            .by_version
            .get(&version)
            .cloned()
            .ok_or(GovrailError::ManifestNotFound { version })?;

        if let Err(reason) = gate_allows_activation(&candidate, gate_config, shadow_report, force) {
            warn!(version, reason = %reason, "activation gate blocked");
            return Err(GovrailError::ActivationGateBlocked { reason });
        }

        if let Some(active_version) = state.active_version {
            if active_version != version {
                if let Some(prev) = state.by_version.get_mut(&active_version) {
                    prev.shadow_mode = true;
                    prev.shadow_start = Some(Utc::now());
                }
            }
        }

        let activated = {
            let manifest = state.by_version.get_mut(&version).expect("checked above");
            manifest.shadow_mode = false;
            manifest.effective_at = Some(Utc::now());
            manifest.clone()
        };
        state.active_version = Some(version);
        if state.shadow_version == Some(version) {
            state.shadow_version = None;
        }
        info!(version, forced = force, "manifest activated");
        Ok(activated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdMap;

    fn blank_manifest(version: u64, hash_prev: Option<String>) -> Manifest {
        Manifest {
            manifest_id: format!("manifest-{version}"),
            version,
            created_at: Utc::now(),
            hash_prev,
            hash_self: String::new(),
            effective_at: None,
            shadow_mode: true,
            shadow_start: None,
            rules: vec![],
            budget_defaults: Default::default(),
            risk_classes: StdMap::new(),
            job_overrides: StdMap::new(),
            metadata: StdMap::new(),
        }
    }

    #[tokio::test]
    async fn create_computes_hash_self_when_absent() {
        let registry = ManifestRegistry::new();
        let created = registry.create(blank_manifest(1, None), true).await.unwrap();
        assert_eq!(created.hash_self.len(), 64);
    }

    #[tokio::test]
    async fn create_rejects_dangling_hash_prev() {
        let registry = ManifestRegistry::new();
        let err = registry
            .create(blank_manifest(2, Some("nonexistent".into())), true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MANIFEST_HASH_MISMATCH");
    }

    #[tokio::test]
    async fn hash_chain_forks_are_permitted() {
        let registry = ManifestRegistry::new();
        let v1 = registry.create(blank_manifest(1, None), true).await.unwrap();
        let v2 = registry
            .create(blank_manifest(2, Some(v1.hash_self.clone())), true)
            .await
            .unwrap();
        let v3 = registry
            .create(blank_manifest(3, Some(v1.hash_self.clone())), true)
            .await
            .unwrap();
        assert_eq!(v2.hash_prev, v3.hash_prev);
    }

    #[tokio::test]
    async fn at_most_one_manifest_is_active_at_a_time() {
        let registry = ManifestRegistry::new();
        registry.create(blank_manifest(1, None), true).await.unwrap();
        registry.create(blank_manifest(2, None), true).await.unwrap();
        registry
            .activate(1, &ActivationGateConfig::default(), None, true)
            .await
            .unwrap();
        registry
            .activate(2, &ActivationGateConfig::default(), None, true)
            .await
            .unwrap();
        let active = registry.get_active().await.unwrap();
        assert_eq!(active.version, 2);
        let demoted = registry.get(1).await.unwrap();
        assert!(demoted.shadow_mode);
    }

    #[tokio::test]
    async fn activation_without_force_requires_gate_pass() {
        let registry = ManifestRegistry::new();
        registry.create(blank_manifest(1, None), true).await.unwrap();
        let err = registry
            .activate(1, &ActivationGateConfig::default(), None, false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACTIVATION_GATE_BLOCKED");
    }

    #[tokio::test]
    async fn create_rejects_rule_referencing_unknown_risk_class() {
        use govrail_types::{Mode, RuleCondition};
        let registry = ManifestRegistry::new();
        let mut manifest = blank_manifest(1, None);
        manifest.rules.push(govrail_types::ManifestRule {
            rule_id: "r1".into(),
            priority: 1,
            enabled: true,
            when: RuleCondition::Fields(StdMap::from([(
                "risk_class".to_string(),
                serde_json::json!("nonexistent"),
            )])),
            mode: Mode::Direct,
            budget_override: None,
            recovery_strategy: None,
            reason: "uses unregistered class".into(),
        });
        let err = registry.create(manifest, true).await.unwrap_err();
        assert_eq!(err.code(), "MANIFEST_INVALID_SCHEMA");
    }

    #[tokio::test]
    async fn cannot_delete_active_manifest() {
        let registry = ManifestRegistry::new();
        registry.create(blank_manifest(1, None), true).await.unwrap();
        registry
            .activate(1, &ActivationGateConfig::default(), None, true)
            .await
            .unwrap();
        let err = registry.delete(1).await.unwrap_err();
        assert_eq!(err.code(), "MANIFEST_INVALID_SCHEMA");
    }
}
