//! Media fetch with size enforcement
//!
//! One GET per attempt. The declared `Content-Length` is checked before the body is
//! touched; bodies without a declared length are counted while streaming and cut
//! off as soon as they pass the cap.

use crate::config::RetryPolicy;
use crate::error::Error;
use crate::retry::{Attempt, IsRetryable, RetryError, with_retry};
use crate::types::FailureReason;
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a single fetch attempt failed
#[derive(Debug, thiserror::Error)]
pub(crate) enum FetchError {
    /// Declared or observed size is over the cap
    #[error("payload of {size_bytes} bytes exceeds limit of {limit_bytes} bytes")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },

    /// Media host answered with a non-success status
    #[error("media host returned HTTP {0}")]
    Status(u16),

    /// Timeout, connection failure or throttling
    #[error("transient network failure: {0}")]
    Transient(String),

    /// Request could not be built or the response was unusable
    #[error("request failed: {0}")]
    Request(String),

    /// Staging file could not be written
    #[error("could not write staging file: {0}")]
    Storage(#[from] std::io::Error),
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transient(_) => true,
            FetchError::Status(status) => *status >= 500 || *status == 429,
            FetchError::TooLarge { .. } | FetchError::Request(_) | FetchError::Storage(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return FetchError::Status(status.as_u16());
        }
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            return FetchError::Transient(e.to_string());
        }
        FetchError::Request(e.to_string())
    }
}

impl From<&FetchError> for FailureReason {
    fn from(e: &FetchError) -> Self {
        match e {
            FetchError::TooLarge { size_bytes, .. } => FailureReason::TooLarge {
                size_bytes: *size_bytes,
            },
            FetchError::Status(_) if e.is_retryable() => FailureReason::Network,
            FetchError::Status(status) => FailureReason::HttpStatus { status: *status },
            FetchError::Transient(_) | FetchError::Request(_) => FailureReason::Network,
            FetchError::Storage(_) => FailureReason::Storage,
        }
    }
}

impl From<FetchError> for Error {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::TooLarge {
                size_bytes,
                limit_bytes,
            } => Error::PayloadTooLarge {
                size_bytes,
                limit_bytes,
            },
            FetchError::Status(status) if status >= 500 || status == 429 => {
                Error::NetworkTransient(format!("HTTP {status}"))
            }
            FetchError::Status(status) => {
                Error::UnknownFailure(format!("media host returned HTTP {status}"))
            }
            FetchError::Transient(msg) => Error::NetworkTransient(msg),
            FetchError::Request(msg) => Error::UnknownFailure(msg),
            FetchError::Storage(e) => Error::Io(e),
        }
    }
}

/// Download `url` into `dest`, retrying transient failures under `policy`
///
/// Returns the number of bytes written.
pub(crate) async fn fetch_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    limit_bytes: u64,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> std::result::Result<u64, RetryError<FetchError>> {
    with_retry(policy, cancel, move |attempt| async move {
        debug!(attempt, dest = %dest.display(), "Fetching media");
        let result = fetch_once(client, url, dest, limit_bytes).await;
        if result.is_err() {
            // Never leave a partial file behind for the next attempt or the channel
            let _ = tokio::fs::remove_file(dest).await;
        }
        Attempt::from(result)
    })
    .await
}

async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    limit_bytes: u64,
) -> std::result::Result<u64, FetchError> {
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    if let Some(declared) = response.content_length()
        && declared > limit_bytes
    {
        warn!(size_bytes = declared, limit_bytes, "Declared media size exceeds limit");
        return Err(FetchError::TooLarge {
            size_bytes: declared,
            limit_bytes,
        });
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        if written > limit_bytes {
            warn!(size_bytes = written, limit_bytes, "Streamed media exceeded limit");
            return Err(FetchError::TooLarge {
                size_bytes: written,
                limit_bytes,
            });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(written)
}
