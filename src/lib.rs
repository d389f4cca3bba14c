//! # ig-relay
//!
//! Resolves Instagram post, reel, tv and story URLs into their media items and relays
//! each item to a delivery channel.
//!
//! The pipeline for one URL is strictly sequential: classify the URL, make sure an
//! upstream session exists, resolve the post metadata (with retry, backoff and
//! reauthentication), enumerate the media, then fetch each item under a size cap and
//! hand it to the channel. Per-item failures are recorded and the batch continues.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ig_relay::{Config, Downloader, TelegramChannel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let channel = TelegramChannel::new(&config.delivery, &config.bot_token, "123456789")?;
//!
//!     let relay = Downloader::new(config)?;
//!     let result = relay
//!         .run("https://www.instagram.com/p/ABC123/", &channel)
//!         .await;
//!
//!     println!("{:?}: {}", result.status, result.summary);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// URL classification
pub mod classifier;
/// Configuration types
pub mod config;
/// Delivery channel trait and Telegram Bot API sink
pub mod delivery;
/// Batch orchestration (decomposed into focused submodules)
pub mod downloader;
/// Media enumeration from resolved posts
pub mod enumerator;
/// Error types
pub mod error;
/// Upstream metadata provider
pub mod provider;
/// Post metadata resolution
pub mod resolver;
/// Retry logic with backoff and jitter
pub mod retry;
/// Upstream session lifecycle
pub mod session;
/// Core data types
pub mod types;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use classifier::classify;
pub use config::{Config, Credentials, RetryPolicy};
pub use delivery::{DeliveryChannel, TelegramChannel};
pub use downloader::Downloader;
pub use error::{DeliveryError, Error, Result, UpstreamError};
pub use provider::{HttpMetadataProvider, MetadataProvider};
pub use session::{Session, SessionManager};
pub use types::{
    BatchResult, BatchStatus, ContentIdentifier, ContentKind, DownloadOutcome, FailureReason,
    MediaDescriptor, MediaKind,
};
