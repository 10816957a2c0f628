//! Per-operation retry with linear backoff, timeout and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::UploadError;
use crate::options::RetryPolicy;

/// Final outcome of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, UploadError>,
    /// Errors of the failed attempts that were followed by another attempt.
    pub retry_errors: Vec<String>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, the retries are exhausted, or `cancel` fires.
    ///
    /// Every attempt is bounded by `timeout`. Cancellation interrupts both a
    /// running attempt and the backoff sleep and is never retried.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        label: &str,
        mut op: F,
    ) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let mut retry_errors = Vec::new();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Attempted {
                    result: Err(UploadError::Cancelled),
                    retry_errors,
                    attempts,
                };
            }
            attempts += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                r = with_timeout(timeout, op()) => r,
            };

            let err = match outcome {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        retry_errors,
                        attempts,
                    };
                }
                Err(e) if e.is_cancelled() || attempts > self.retry_count => {
                    return Attempted {
                        result: Err(e),
                        retry_errors,
                        attempts,
                    };
                }
                Err(e) => e,
            };

            let delay = self.delay_for(attempts);
            warn!(
                op = label,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "operation failed, retrying"
            );
            retry_errors.push(err.to_string());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Attempted {
                        result: Err(UploadError::Cancelled),
                        retry_errors,
                        attempts,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T, UploadError>>,
) -> Result<T, UploadError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(UploadError::Timeout(limit))),
        None => fut.await,
    }
}
