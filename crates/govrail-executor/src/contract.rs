//! The executor contract: whatever registers against the orchestrator
//! implements this trait. Business-domain handlers are out of scope; this
//! crate only defines and drives the contract.

use std::collections::HashSet;

use async_trait::async_trait;
use govrail_types::{Capability, ExecutionStep, GovrailResult};

#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub plan_id: String,
    pub step_id: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub data: Option<serde_json::Value>,
    pub evidence_path: Option<String>,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn executor_type(&self) -> &str;

    fn capabilities(&self) -> HashSet<Capability>;

    async fn validate_input(&self, _step: &ExecutionStep) -> GovrailResult<()> {
        Ok(())
    }

    async fn execute(&self, step: &ExecutionStep, ctx: &ExecutionContext) -> GovrailResult<StepOutcome>;

    async fn rollback(&self, _step: &ExecutionStep, _ctx: &ExecutionContext) -> GovrailResult<()> {
        Ok(())
    }
}
