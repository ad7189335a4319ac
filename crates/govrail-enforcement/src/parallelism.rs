//! ParallelismLimiter: a global semaphore shared by all attempts plus a
//! lazily-created per-job semaphore. Acquisition is non-blocking — a
//! saturated semaphore rejects immediately rather than queuing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use govrail_types::{Budget, GovrailError, GovrailResult, JobId};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

#[derive(Debug, Default)]
pub struct ParallelismMetrics {
    pub global_rejected_count: AtomicU64,
    pub global_peak_count: AtomicU64,
}

/// Holds both permits for the lifetime of an attempt; dropping releases
/// both, including on error or cancellation.
pub struct SlotGuard {
    _global: OwnedSemaphorePermit,
    _job: OwnedSemaphorePermit,
}

pub struct ParallelismLimiter {
    global: Arc<Semaphore>,
    max_global_parallel: u32,
    job_semaphores: Mutex<HashMap<JobId, Arc<Semaphore>>>,
    job_rejected_counts: Mutex<HashMap<JobId, u64>>,
    metrics: ParallelismMetrics,
}

impl ParallelismLimiter {
    pub fn new(max_global_parallel: u32) -> Self {
        Self {
            global: Arc::new(Semaphore::new(max_global_parallel as usize)),
            max_global_parallel,
            job_semaphores: Mutex::new(HashMap::new()),
            job_rejected_counts: Mutex::new(HashMap::new()),
            metrics: ParallelismMetrics::default(),
        }
    }

    fn job_semaphore(&self, job_id: &JobId, max_parallel_attempts: u32) -> Arc<Semaphore> {
        let mut job_semaphores = self.job_semaphores.lock().expect("parallelism limiter poisoned");
        job_semaphores
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(max_parallel_attempts as usize)))
            .clone()
    }

    /// Acquires both the global and per-job slot without blocking. Either
    /// being saturated rejects immediately with a `limit_type` tag.
    pub async fn acquire_slot(&self, job_id: JobId, budget: &Budget) -> GovrailResult<SlotGuard> {
        let global_permit = Arc::clone(&self.global).try_acquire_owned().map_err(|_| {
            self.metrics.global_rejected_count.fetch_add(1, Ordering::Relaxed);
            warn!(%job_id, "global parallelism limit reached");
            GovrailError::BudgetParallelismExceeded {
                limit_type: "global".to_string(),
            }
        })?;

        let in_use = self.max_global_parallel as usize - self.global.available_permits();
        self.metrics
            .global_peak_count
            .fetch_max(in_use as u64, Ordering::Relaxed);

        let max_parallel_attempts = budget.max_parallel_attempts.unwrap_or(1);
        let job_semaphore = self.job_semaphore(&job_id, max_parallel_attempts);
        let job_permit = job_semaphore.try_acquire_owned().map_err(|_| {
            let mut rejected = self.job_rejected_counts.lock().expect("parallelism limiter poisoned");
            *rejected.entry(job_id.clone()).or_insert(0) += 1;
            warn!(%job_id, "per-job parallelism limit reached");
            GovrailError::BudgetParallelismExceeded {
                limit_type: "job".to_string(),
            }
        })?;

        Ok(SlotGuard {
            _global: global_permit,
            _job: job_permit,
        })
    }

    pub fn global_active_count(&self) -> usize {
        self.max_global_parallel as usize - self.global.available_permits()
    }

    pub fn global_rejected_count(&self) -> u64 {
        self.metrics.global_rejected_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saturated_global_semaphore_is_rejected_not_queued() {
        let limiter = ParallelismLimiter::new(1);
        let budget = Budget {
            max_parallel_attempts: Some(5),
            ..Default::default()
        };
        let job_id = JobId::new();
        let _guard = limiter.acquire_slot(job_id.clone(), &budget).await.unwrap();
        let err = limiter.acquire_slot(job_id, &budget).await.unwrap_err();
        match err {
            GovrailError::BudgetParallelismExceeded { limit_type } => assert_eq!(limit_type, "global"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn saturated_job_semaphore_is_rejected_with_job_tag() {
        let limiter = ParallelismLimiter::new(10);
        let budget = Budget {
            max_parallel_attempts: Some(1),
            ..Default::default()
        };
        let job_id = JobId::new();
        let _guard = limiter.acquire_slot(job_id.clone(), &budget).await.unwrap();
        let err = limiter.acquire_slot(job_id, &budget).await.unwrap_err();
        match err {
            GovrailError::BudgetParallelismExceeded { limit_type } => assert_eq!(limit_type, "job"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_guard_releases_both_slots() {
        let limiter = ParallelismLimiter::new(1);
        let budget = Budget {
            max_parallel_attempts: Some(1),
            ..Default::default()
        };
        let job_id = JobId::new();
        {
            let _guard = limiter.acquire_slot(job_id.clone(), &budget).await.unwrap();
        }
        let second = limiter.acquire_slot(job_id, &budget).await;
        assert!(second.is_ok());
    }
}
