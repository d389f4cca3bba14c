//! Retry logic with bounded backoff
//!
//! Network-calling operations are driven by a [`RetryPolicy`] value. Each attempt
//! reports a tagged [`Attempt`] so the caller decides, per failure, whether another
//! attempt makes sense. Delays carry optional jitter to prevent thundering herd, and
//! every wait is raced against a [`CancellationToken`].
//!
//! # Example
//!
//! ```no_run
//! use ig_relay::config::RetryPolicy;
//! use ig_relay::retry::{Attempt, with_retry};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let policy = RetryPolicy::linear(3, Duration::from_secs(1));
//! let cancel = CancellationToken::new();
//! let result = with_retry(&policy, &cancel, |attempt| async move {
//!     if attempt < 2 {
//!         Attempt::Retry("flaky")
//!     } else {
//!         Attempt::Done(42)
//!     }
//! })
//! .await;
//! assert_eq!(result.ok(), Some(42));
//! # }
//! ```

use crate::config::RetryPolicy;
use crate::error::{Error, UpstreamError};
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, throttling, connection reset) return `true`.
/// Permanent failures (not found, bad credentials, oversize payload) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429)
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::UpstreamRateLimited(_)
            | Error::UpstreamTransient(_)
            | Error::NetworkTransient(_)
            | Error::AuthExpired => true,
            Error::Config { .. }
            | Error::MalformedInput(_)
            | Error::AuthFailure { .. }
            | Error::NotFound(_)
            | Error::PrivateAccount { .. }
            | Error::PayloadTooLarge { .. }
            | Error::Cancelled
            | Error::Delivery(_)
            | Error::Serialization(_)
            | Error::UnknownFailure(_) => false,
        }
    }
}

impl IsRetryable for UpstreamError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::RateLimited { .. }
                | UpstreamError::Connection(_)
                | UpstreamError::Unauthorized { .. }
        )
    }
}

/// Outcome of a single attempt
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The operation succeeded
    Done(T),
    /// The operation failed but another attempt may succeed
    Retry(E),
    /// The operation failed for good
    Fail(E),
}

impl<T, E: IsRetryable> From<std::result::Result<T, E>> for Attempt<T, E> {
    fn from(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(value) => Attempt::Done(value),
            Err(e) if e.is_retryable() => Attempt::Retry(e),
            Err(e) => Attempt::Fail(e),
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// An attempt reported a permanent failure
    Terminal(E),
    /// Every attempt allowed by the policy failed
    Exhausted {
        /// Number of attempts made
        attempts: u32,
        /// The last failure observed
        last: E,
    },
    /// The cancellation token fired
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying failure, if the operation was not cancelled
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Terminal(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Terminal(e) => write!(f, "{e}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "{last} (gave up after {attempts} attempts)")
            }
            RetryError::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Execute an async operation under a bounded retry policy
///
/// The operation receives the 1-based attempt number. After a [`Attempt::Retry`] the
/// function sleeps for [`RetryPolicy::delay_for`] (plus jitter when enabled) and calls
/// the operation again, until `policy.max_attempts` calls have been made.
///
/// Both the operation and the sleeps are raced against `cancel`; cancellation wins
/// and yields [`RetryError::Cancelled`].
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = operation(attempt) => outcome,
        };

        match outcome {
            Attempt::Done(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Attempt::Fail(e) => {
                tracing::error!(error = %e, attempt, "Operation failed with non-retryable error");
                return Err(RetryError::Terminal(e));
            }
            Attempt::Retry(e) if attempt >= max_attempts => {
                tracing::error!(
                    error = %e,
                    attempts = attempt,
                    "Operation failed after all retry attempts exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Attempt::Retry(e) => {
                let delay = policy.delay_for(attempt);
                let delay = if policy.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                if !sleep_or_cancel(delay, cancel).await {
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first
///
/// Returns `false` when the sleep was interrupted by cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// result lies between `delay` and `2 * delay`.
pub(crate) fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

/// Pick a uniformly random delay in `[min, max]`
pub(crate) fn random_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    Duration::from_secs_f64(rng.gen_range(min.as_secs_f64()..=max.as_secs_f64()))
}
