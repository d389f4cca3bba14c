//! Download orchestration split into focused submodules.
//!
//! The [`Downloader`] struct and its methods are organized by concern:
//! - [`batch`] - One URL end to end: classify, resolve, enumerate, relay each item
//! - [`fetch`] - Media fetch with size enforcement and retry

mod batch;
mod fetch;


use crate::config::Config;
use crate::error::{Error, Result};
use crate::provider::{HttpMetadataProvider, MetadataProvider};
use crate::resolver::PostResolver;
use crate::session::SessionManager;
use std::sync::Arc;

/// Main relay instance (cloneable - all fields are Arc-wrapped)
///
/// Clones share the session manager, so concurrent batches reuse one upstream
/// session and at most one login is in flight.
#[derive(Clone)]
pub struct Downloader {
    /// Configuration (wrapped in Arc for sharing across batches)
    pub(crate) config: Arc<Config>,
    /// Shared upstream session
    pub(crate) sessions: Arc<SessionManager>,
    /// Post metadata resolution
    pub(crate) resolver: Arc<PostResolver>,
    /// HTTP client for media hosts
    pub(crate) media_client: reqwest::Client,
}

impl Downloader {
    /// Create a relay talking to the platform's web endpoints
    pub fn new(config: Config) -> Result<Self> {
        let provider = Arc::new(HttpMetadataProvider::new(&config.resolver)?);
        Self::with_provider(config, provider)
    }

    /// Create a relay with a custom metadata provider
    pub fn with_provider(config: Config, provider: Arc<dyn MetadataProvider>) -> Result<Self> {
        config.validate()?;

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&provider),
            config.credentials.clone(),
            config.session.clone(),
        ));
        let resolver = Arc::new(PostResolver::new(
            provider,
            Arc::clone(&sessions),
            config.resolver.retry.clone(),
        ));
        let media_client = reqwest::Client::builder()
            .timeout(config.download.request_timeout)
            .build()
            .map_err(Error::Network)?;

        tracing::info!(
            authenticated = config.credentials.is_some(),
            max_payload_bytes = config.download.max_payload_bytes,
            "Relay initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            sessions,
            resolver,
            media_client,
        })
    }

    /// The session manager shared by every clone of this relay
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
