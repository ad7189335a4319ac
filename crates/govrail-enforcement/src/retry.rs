//! RetryHandler: exponential backoff with jitter for mechanical failures.
//! Ethical/policy denials are never retried; budget-exceeded errors are
//! mechanical but explicitly excluded from retry (§7 footnote).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use govrail_types::{Budget, GovrailError, GovrailResult};
use rand::Rng;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 250,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_pct: 0.25,
        }
    }
}

#[derive(Debug, Default)]
pub struct RetryHandler {
    config: RetryConfig,
    attempts_made: AtomicU64,
    exhausted_count: AtomicU64,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts_made: AtomicU64::new(0),
            exhausted_count: AtomicU64::new(0),
        }
    }

    /// `d_i = base * multiplier^i`, clamped to `max_delay`, then jittered
    /// by up to `±jitter_pct`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = (self.config.base_delay_ms as f64) * self.config.backoff_multiplier.powi(attempt as i32);
        let clamped = raw.min(self.config.max_delay_ms as f64);
        let jitter_range = clamped * self.config.jitter_pct;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        let jittered = (clamped + jitter).max(0.0);
        Duration::from_millis(jittered.round() as u64)
    }

    pub fn metrics(&self) -> (u64, u64) {
        (
            self.attempts_made.load(Ordering::Relaxed),
            self.exhausted_count.load(Ordering::Relaxed),
        )
    }

    /// Calls `f` repeatedly on mechanical, retriable failure, up to
    /// `budget.max_retries` times, sleeping between attempts.
    pub async fn call<F, Fut, T>(&self, budget: &Budget, mut f: F) -> GovrailResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GovrailResult<T>>,
    {
        let max_retries = budget.max_retries.unwrap_or(0);
        let mut last_error: Option<GovrailError> = None;

        for attempt in 0..=max_retries {
            self.attempts_made.fetch_add(1, Ordering::Relaxed);
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.retriable() {
                        debug!(code = err.code(), "non-retriable error, short-circuiting");
                        return Err(err);
                    }
                    if attempt == max_retries {
                        last_error = Some(err);
                        break;
                    }
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, code = err.code(), "retrying after delay");
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.exhausted_count.fetch_add(1, Ordering::Relaxed);
        let last_error = last_error.expect("loop always sets last_error before exiting on failure");
        warn!(max_retries, "retries exhausted");
        Err(GovrailError::RetryExhausted {
            last_error: last_error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn delay_is_monotonic_modulo_jitter() {
        let handler = RetryHandler::new(RetryConfig {
            jitter_pct: 0.0,
            ..RetryConfig::default()
        });
        let d0 = handler.delay_for_attempt(0);
        let d1 = handler.delay_for_attempt(1);
        let d2 = handler.delay_for_attempt(2);
        assert!(d1 >= d0);
        assert!(d2 >= d1);
    }

    #[test]
    fn delay_is_clamped_to_max_delay() {
        let handler = RetryHandler::new(RetryConfig {
            max_delay_ms: 1_000,
            jitter_pct: 0.0,
            ..RetryConfig::default()
        });
        let delay = handler.delay_for_attempt(20);
        assert!(delay.as_millis() as u64 <= 1_000);
    }

    #[tokio::test]
    async fn mechanical_retriable_errors_are_retried_until_success() {
        let handler = RetryHandler::new(RetryConfig {
            base_delay_ms: 1,
            jitter_pct: 0.0,
            ..RetryConfig::default()
        });
        let budget = Budget {
            max_retries: Some(3),
            ..Default::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();
        let result = handler
            .call(&budget, || {
                let calls = calls_inner.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::Relaxed);
                    if n < 2 {
                        Err(GovrailError::UpstreamUnavailable { detail: "flaky".into() })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn ethical_style_non_retriable_errors_short_circuit() {
        let handler = RetryHandler::new(RetryConfig::default());
        let budget = Budget {
            max_retries: Some(5),
            ..Default::default()
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_inner = calls.clone();
        let result: GovrailResult<()> = handler
            .call(&budget, || {
                let calls = calls_inner.clone();
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(GovrailError::BudgetCostExceeded)
                }
            })
            .await;
        assert!(matches!(result, Err(GovrailError::BudgetCostExceeded)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_reports_retry_exhausted_with_last_error() {
        let handler = RetryHandler::new(RetryConfig {
            base_delay_ms: 1,
            jitter_pct: 0.0,
            ..RetryConfig::default()
        });
        let budget = Budget {
            max_retries: Some(2),
            ..Default::default()
        };
        let result: GovrailResult<()> = handler
            .call(&budget, || async {
                Err(GovrailError::UpstreamUnavailable { detail: "down".into() })
            })
            .await;
        assert!(matches!(result, Err(GovrailError::RetryExhausted { .. })));
    }
}
