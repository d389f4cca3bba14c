//! Error types for ig-relay
//!
//! This module provides the error taxonomy for the pipeline:
//! - [`Error`] - batch-level and ambient failures (config, I/O, classification, upstream)
//! - [`UpstreamError`] - failures reported by a [`MetadataProvider`](crate::provider::MetadataProvider)
//! - [`DeliveryError`] - failures reported by a [`DeliveryChannel`](crate::delivery::DeliveryChannel)
//!
//! Every [`Error`] has a stable machine-readable code and a short user-facing message
//! that never echoes raw upstream text.

use thiserror::Error;

/// Result type alias for ig-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ig-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "TELEGRAM_BOT_TOKEN")
        key: Option<String>,
    },

    /// The input URL does not match any supported pattern
    #[error("unrecognized URL: {0}")]
    MalformedInput(String),

    /// Upstream rejected the configured credentials
    #[error("upstream rejected credentials for {username}")]
    AuthFailure {
        /// The account whose login was rejected
        username: String,
    },

    /// Upstream session is no longer valid and must be re-acquired
    #[error("upstream session expired")]
    AuthExpired,

    /// Upstream answered with a rate-limit or bad-request class status
    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    /// Upstream could not be reached or answered with a server error
    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    /// The post or story does not exist
    #[error("content not found: {0}")]
    NotFound(String),

    /// The owner's account is private and the session does not follow it
    #[error("account {username} is private")]
    PrivateAccount {
        /// Owner username
        username: String,
        /// Public profile URL of the owner
        profile_url: String,
    },

    /// A media item is larger than the configured cap
    #[error("payload too large: {size_bytes} bytes exceeds limit of {limit_bytes} bytes")]
    PayloadTooLarge {
        /// Declared or observed size of the item
        size_bytes: u64,
        /// Configured maximum
        limit_bytes: u64,
    },

    /// Media fetch failed with a transient network condition
    #[error("transient network failure: {0}")]
    NetworkTransient(String),

    /// The caller cancelled the batch
    #[error("operation cancelled")]
    Cancelled,

    /// Delivery channel refused or failed to accept an item
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything that does not fit a category above
    #[error("{0}")]
    UnknownFailure(String),
}

impl Error {
    /// Stable machine-readable code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::MalformedInput(_) => "malformed_input",
            Error::AuthFailure { .. } => "auth_failure",
            Error::AuthExpired => "auth_expired",
            Error::UpstreamRateLimited(_) => "upstream_rate_limited",
            Error::UpstreamTransient(_) => "upstream_transient",
            Error::NotFound(_) => "not_found",
            Error::PrivateAccount { .. } => "private_account",
            Error::PayloadTooLarge { .. } => "too-large",
            Error::NetworkTransient(_) => "network_transient",
            Error::Cancelled => "cancelled",
            Error::Delivery(_) => "delivery_failed",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::UnknownFailure(_) => "unknown_failure",
        }
    }

    /// Short message suitable for showing to the person who sent the URL
    ///
    /// Only the category is exposed. The one exception is [`Error::PayloadTooLarge`],
    /// which carries the size in MB.
    pub fn user_message(&self) -> String {
        match self {
            Error::MalformedInput(_) => "Unsupported link. Send a link to an Instagram post, \
                 reel, video or story, e.g. https://www.instagram.com/reel/ABC123/"
                .to_string(),
            Error::AuthFailure { .. } | Error::AuthExpired => {
                "Could not authenticate with Instagram. Try again later.".to_string()
            }
            Error::UpstreamRateLimited(_) => {
                "Instagram is limiting requests right now. Try again in a few minutes.".to_string()
            }
            Error::UpstreamTransient(_) | Error::NetworkTransient(_) | Error::Network(_) => {
                "Instagram could not be reached. Try again later.".to_string()
            }
            Error::NotFound(_) => "Post not found. The link may be broken or removed.".to_string(),
            Error::PrivateAccount { profile_url, .. } => {
                format!("This account is private: {profile_url}")
            }
            Error::PayloadTooLarge { size_bytes, .. } => {
                format!("File is too large ({:.1} MB).", bytes_to_mb(*size_bytes))
            }
            Error::Cancelled => "Download cancelled.".to_string(),
            Error::Delivery(_) => "Could not send the file.".to_string(),
            Error::Config { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::UnknownFailure(_) => "Something went wrong while downloading.".to_string(),
        }
    }
}

/// Convert a byte count into megabytes (MiB) for display
pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Failures reported by the upstream metadata provider
///
/// Providers classify every failure into one of these classes; the resolver and
/// session manager decide retry behaviour from the class alone.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The identifier does not resolve to any content
    #[error("not found (HTTP {status})")]
    NotFound {
        /// HTTP status returned by upstream
        status: u16,
    },

    /// Upstream throttled the request or rejected it as malformed
    #[error("rate limited or bad request (HTTP {status}): {message}")]
    RateLimited {
        /// HTTP status returned by upstream
        status: u16,
        /// Raw upstream detail, for logs only
        message: String,
    },

    /// The session is missing or expired
    #[error("authentication required (HTTP {status})")]
    Unauthorized {
        /// HTTP status returned by upstream
        status: u16,
    },

    /// Login was rejected for the supplied credentials
    #[error("invalid credentials: {0}")]
    BadCredentials(String),

    /// Transport failure, timeout or server-side error
    #[error("connection failure: {0}")]
    Connection(String),

    /// Response could not be interpreted
    #[error("unexpected upstream response: {0}")]
    Unexpected(String),
}

impl UpstreamError {
    /// Classify a non-success HTTP status into an upstream error class
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => UpstreamError::Unauthorized { status },
            404 | 410 => UpstreamError::NotFound { status },
            400 | 429 => UpstreamError::RateLimited {
                status,
                message: truncate_for_log(body),
            },
            s if s >= 500 => UpstreamError::Connection(format!("HTTP {s}")),
            s => UpstreamError::Unexpected(format!("HTTP {s}: {}", truncate_for_log(body))),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return UpstreamError::from_status(status.as_u16(), "");
        }
        if e.is_decode() {
            return UpstreamError::Unexpected(e.to_string());
        }
        UpstreamError::Connection(e.to_string())
    }
}

impl From<UpstreamError> for Error {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::NotFound { status } => Error::NotFound(format!("HTTP {status}")),
            UpstreamError::RateLimited { status, message } => {
                Error::UpstreamRateLimited(format!("HTTP {status}: {message}"))
            }
            UpstreamError::Unauthorized { .. } => Error::AuthExpired,
            UpstreamError::BadCredentials(username) => Error::AuthFailure { username },
            UpstreamError::Connection(msg) => Error::UpstreamTransient(msg),
            UpstreamError::Unexpected(msg) => Error::UnknownFailure(msg),
        }
    }
}

/// Failures reported by a delivery channel
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The channel answered but refused the item
    #[error("rejected by channel: {0}")]
    Rejected(String),

    /// The channel could not be reached
    #[error("channel unreachable: {0}")]
    Unreachable(String),

    /// The staged file could not be read
    #[error("could not read staged file: {0}")]
    Io(#[from] std::io::Error),
}

fn truncate_for_log(body: &str) -> String {
    const MAX: usize = 300;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
