//! Idempotency short-circuit: a step tagged `Capability::Idempotent` is
//! keyed by a hash of its step_id and canonical parameters; a repeat
//! execution with the same key replays the cached outcome instead of
//! re-running.

use std::collections::HashMap;
use std::sync::Mutex;

use govrail_types::ExecutionStep;
use sha2::{Digest, Sha256};

use crate::contract::StepOutcome;

pub fn idempotency_key(step: &ExecutionStep) -> String {
    let mut params: Vec<(&String, &serde_json::Value)> = step.parameters.iter().collect();
    params.sort_by_key(|(k, _)| k.as_str());
    let canonical = serde_json::to_string(&params).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(step.step_id.as_bytes());
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Default)]
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, StepOutcome>>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StepOutcome> {
        self.entries.lock().expect("idempotency cache poisoned").get(key).cloned()
    }

    pub fn put(&self, key: String, outcome: StepOutcome) {
        self.entries.lock().expect("idempotency cache poisoned").insert(key, outcome);
    }
}
