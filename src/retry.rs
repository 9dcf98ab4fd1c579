//! Retry logic with exponential backoff
//!
//! Transient failures (dropped FTP connections, timeouts, resets) are retried
//! with a deterministic doubling delay: `base_delay`, `2 * base_delay`,
//! `4 * base_delay`, ... Permanent failures (corrupt payloads, missing files)
//! are returned immediately.
//!
//! # Example
//!
//! ```no_run
//! use datasus_dl::retry::{IsRetryable, RetryPolicy, download_with_retry};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let policy = RetryPolicy::new(3, Duration::from_secs(1));
//! let attempted = download_with_retry(&policy, &CancellationToken::new(), || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! attempted.result?;
//! # Ok(())
//! # }
//! ```

use crate::config::TransferOptions;
use crate::error::Error;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection reset) should return `true`.
/// Permanent failures (missing file, corrupt data, bad configuration) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // Codec errors describe the bytes, not the transport
            Error::MissingHeader { .. }
            | Error::InvalidHeaderSize { .. }
            | Error::Decompression(_) => false,
            Error::NotFound(_) => false,
            Error::Config { .. } => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }
}

/// Retry budget and backoff base for one operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as u32;
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl From<&TransferOptions> for RetryPolicy {
    fn from(options: &TransferOptions) -> Self {
        Self::new(options.max_retries, options.retry_base_delay)
    }
}

/// Result of a retried operation together with how many retries it took
#[derive(Debug)]
pub struct Attempted<T, E> {
    /// Final result (success, or the last error seen)
    pub result: Result<T, E>,
    /// Retries performed after the first attempt
    pub retries: usize,
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation is attempted once, then retried up to `policy.max_retries`
/// times while it keeps failing with a retryable error. Cancelling `cancel`
/// interrupts a pending backoff sleep and returns the last error.
pub async fn download_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(attempts = retries + 1, "Operation succeeded after retry");
                }
                return Attempted {
                    result: Ok(value),
                    retries,
                };
            }
            Err(e) if e.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries);

                tracing::warn!(
                    error = %e,
                    attempt = retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        tracing::debug!(error = %e, "Retry abandoned, operation cancelled");
                        return Attempted {
                            result: Err(e),
                            retries,
                        };
                    }
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = retries + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Attempted {
                    result: Err(e),
                    retries,
                };
            }
        }
    }
}
