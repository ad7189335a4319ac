//! TimeoutEnforcer: runs a payload under a hard deadline, with an optional
//! cleanup handler given a grace period once the deadline is exceeded.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use govrail_types::{Budget, GovrailError, GovrailResult};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Default)]
pub struct TimeoutMetrics {
    pub timeout_count: AtomicU64,
    pub grace_period_invoked_count: AtomicU64,
    pub grace_period_exceeded_count: AtomicU64,
}

#[derive(Debug, Default)]
pub struct TimeoutEnforcer {
    metrics: TimeoutMetrics,
}

impl TimeoutEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> (u64, u64, u64) {
        (
            self.metrics.timeout_count.load(Ordering::Relaxed),
            self.metrics.grace_period_invoked_count.load(Ordering::Relaxed),
            self.metrics.grace_period_exceeded_count.load(Ordering::Relaxed),
        )
    }

    /// Runs `payload` under `budget.timeout_ms`. On expiry, cancels the
    /// token and returns `ExecTimeout`.
    pub async fn enforce<F, Fut, T>(
        &self,
        budget: &Budget,
        token: CancellationToken,
        payload: F,
    ) -> GovrailResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = GovrailResult<T>>,
    {
        let timeout_ms = budget.timeout_ms.unwrap_or(30_000);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), payload(token.clone())).await {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                self.metrics.timeout_count.fetch_add(1, Ordering::Relaxed);
                warn!(timeout_ms, "payload exceeded timeout");
                Err(GovrailError::ExecTimeout)
            }
        }
    }

    /// Same as `enforce`, but on timeout gives the payload `grace_period_ms`
    /// to run `cleanup` before giving up entirely. Exceeding the grace
    /// period is itself reported as a timeout.
    pub async fn enforce_with_grace_period<F, Fut, T, C, CFut>(
        &self,
        budget: &Budget,
        token: CancellationToken,
        payload: F,
        cleanup: C,
    ) -> GovrailResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = GovrailResult<T>>,
        C: FnOnce() -> CFut,
        CFut: Future<Output = ()>,
    {
        let timeout_ms = budget.timeout_ms.unwrap_or(30_000);
        let grace_ms = budget.grace_period_ms.unwrap_or(5_000);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), payload(token.clone())).await {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                self.metrics.timeout_count.fetch_add(1, Ordering::Relaxed);
                self.metrics.grace_period_invoked_count.fetch_add(1, Ordering::Relaxed);
                if tokio::time::timeout(Duration::from_millis(grace_ms), cleanup())
                    .await
                    .is_err()
                {
                    self.metrics.grace_period_exceeded_count.fetch_add(1, Ordering::Relaxed);
                    warn!(grace_ms, "cleanup handler exceeded grace period");
                }
                warn!(timeout_ms, "payload exceeded timeout");
                Err(GovrailError::ExecTimeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enforce_returns_ok_when_within_budget() {
        let enforcer = TimeoutEnforcer::new();
        let budget = Budget {
            timeout_ms: Some(500),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let result = enforcer.enforce(&budget, token, |_t| async move { Ok::<_, GovrailError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
