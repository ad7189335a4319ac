//! End-to-end scenario test for the timeout enforcer (Testable Properties
//! §8, S4).

use std::sync::atomic::Ordering;
use std::time::Duration;

use govrail_enforcement::TimeoutEnforcer;
use govrail_types::{Budget, GovrailError};
use tokio_util::sync::CancellationToken;

/// S4 — payload sleeping past timeout_ms; cleanup runs within grace_period_ms.
#[tokio::test]
async fn s4_timeout_fires_and_invokes_cleanup() {
    let enforcer = TimeoutEnforcer::new();
    let budget = Budget {
        timeout_ms: Some(50),
        grace_period_ms: Some(40),
        ..Default::default()
    };
    let token = CancellationToken::new();
    let cleaned_up = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let cleaned_up_inner = cleaned_up.clone();

    let result = enforcer
        .enforce_with_grace_period(
            &budget,
            token.clone(),
            |_t| async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(42u32)
            },
            || async move {
                cleaned_up_inner.store(true, Ordering::Relaxed);
            },
        )
        .await;

    assert!(matches!(result, Err(GovrailError::ExecTimeout)));
    assert!(cleaned_up.load(Ordering::Relaxed));
    assert!(token.is_cancelled());
}
