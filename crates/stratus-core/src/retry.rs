//! Single retry helper wrapped around every part and session call

use std::future::Future;

use stratus_transport::FailureClass;
use tracing::{debug, warn};

use crate::cancel::CancelHandle;
use crate::config::RetryConfig;
use crate::error::PartError;

/// Run `op` until it succeeds, fails non-transiently, exhausts
/// `policy.max_attempts`, or the run is cancelled.
///
/// `op` receives the 1-based attempt number. On success returns the value and
/// the attempts used; on failure the last error and the attempts used.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    cancel: &CancelHandle,
    label: &str,
    mut op: F,
) -> Result<(T, u32), (PartError, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PartError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op = label, attempt, "succeeded after retry");
                }
                return Ok((value, attempt));
            }
            Err(e) => {
                let retryable = e.class() == FailureClass::Transient;
                if !retryable || attempt >= max_attempts || cancel.is_cancelled() {
                    return Err((e, attempt));
                }

                let delay = policy.backoff_duration(attempt);
                warn!(
                    op = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
