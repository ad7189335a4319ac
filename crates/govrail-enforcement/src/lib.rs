//! Budget enforcement (C4): composes timeout, parallelism, cost and retry
//! guards around a payload. The textual nesting order is
//! "timeout wraps parallelism wraps cost wraps retry wraps payload", but
//! a retry re-enters parallelism acquisition and restarts the timeout on
//! every attempt — so `RetryHandler` is the outer driver that loops the
//! whole `Timeout(Parallelism(Cost(payload)))` chain.

pub mod cost;
pub mod parallelism;
pub mod retry;
pub mod timeout;

pub use cost::{CostAccumulator, CostTracker};
pub use parallelism::{ParallelismLimiter, SlotGuard};
pub use retry::{RetryConfig, RetryHandler};
pub use timeout::TimeoutEnforcer;

use std::future::Future;
use std::sync::Arc;

use govrail_types::{AttemptId, Budget, GovrailResult, JobId};
use tokio_util::sync::CancellationToken;

/// The four C4 enforcers, composed for a single attempt's run.
pub struct GuardStack {
    pub timeout: Arc<TimeoutEnforcer>,
    pub parallelism: Arc<ParallelismLimiter>,
    pub cost: Arc<CostTracker>,
    pub retry: Arc<RetryHandler>,
}

impl GuardStack {
    pub fn new(max_global_parallel: u32, retry_config: RetryConfig) -> Self {
        Self {
            timeout: Arc::new(TimeoutEnforcer::new()),
            parallelism: Arc::new(ParallelismLimiter::new(max_global_parallel)),
            cost: Arc::new(CostTracker::new()),
            retry: Arc::new(RetryHandler::new(retry_config)),
        }
    }

    /// Runs `payload` for `attempt_id`/`job_id` under `budget`, enforcing
    /// all four guards. `payload` is called once per retry attempt, each
    /// time under a fresh parallelism slot and a fresh timeout deadline.
    pub async fn run<F, Fut, T>(
        &self,
        attempt_id: AttemptId,
        job_id: JobId,
        budget: &Budget,
        payload: F,
    ) -> GovrailResult<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = GovrailResult<T>>,
    {
        self.cost.init_accumulator(attempt_id.clone(), budget);

        let result = self
            .retry
            .call(budget, || {
                let job_id = job_id.clone();
                let token = CancellationToken::new();
                async {
                    let _slot = self.parallelism.acquire_slot(job_id, budget).await?;
                    self.timeout.enforce(budget, token, &payload).await
                }
            })
            .await;

        self.cost.finalize_accumulator(&attempt_id);
        result
    }
}
