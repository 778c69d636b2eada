//! Caller-side retry with exponential backoff.
//!
//! Nothing in the tunnel retries on its own. Callers that want to ride out a
//! flapping bastion wrap an operation with [`with_retry`]:
//!
//! - **Initial delay**: [`RetryPolicy::min_delay`]
//! - **Maximum delay**: [`RetryPolicy::max_delay`]
//! - **Maximum retries**: [`RetryPolicy::max_retries`]
//! - **Jitter**: added to every delay to avoid thundering herds
//!
//! Only errors with [`TunnelError::is_retryable`] are retried. Authentication
//! and host key failures are never retried, to avoid account lockouts and to
//! keep a MITM warning from being papered over.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

use backon::{ExponentialBuilder, Retryable};
use tracing::{error, info, warn};

use crate::tunnel::config::RetryPolicy;
use crate::tunnel::error::TunnelError;

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are exhausted. `label` identifies the operation in logs.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, TunnelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TunnelError>>,
{
    let attempt_counter = AtomicU32::new(0);

    let backoff = ExponentialBuilder::default()
        .with_min_delay(policy.min_delay)
        .with_max_delay(policy.max_delay)
        .with_max_times(policy.max_retries as usize)
        .with_jitter();

    let result = (|| {
        let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);
        if current_attempt > 0 {
            warn!("{}: retry attempt {}", label, current_attempt);
        }
        op()
    })
    .retry(backoff)
    .when(|e: &TunnelError| {
        let retryable = e.is_retryable();
        if !retryable {
            warn!("{} failed with non-retryable error: {}", label, e);
        }
        retryable
    })
    .notify(|err, dur| {
        warn!("{} failed: {}. Retrying in {:?}", label, err, dur);
    })
    .await;

    let total_attempts = attempt_counter.load(Ordering::SeqCst);
    let retry_count = total_attempts.saturating_sub(1);

    match &result {
        Ok(_) if retry_count > 0 => {
            info!("{} succeeded after {} retry attempt(s)", label, retry_count);
        }
        Ok(_) => {}
        Err(e) => {
            error!(
                "{} failed after {} attempt(s). Last error: {}",
                label, total_attempts, e
            );
        }
    }

    result
}
