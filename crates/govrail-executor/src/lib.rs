//! Executor orchestrator (C6): validates a plan's DAG, runs preflight
//! checks, walks steps in dependency order with idempotency short-circuit,
//! and rolls back in reverse order on failure.

pub mod contract;
pub mod dag;
pub mod idempotency;
pub mod orchestrator;
pub mod preflight;

pub use contract::{ExecutionContext, StepExecutor, StepOutcome};
pub use idempotency::{idempotency_key, IdempotencyCache};
pub use orchestrator::{ExecutorRegistry, Orchestrator};
pub use preflight::{PreflightChecker, PreflightConfig, PreflightResult};
