//! Upstream session lifecycle
//!
//! [`SessionManager`] owns the one session every batch shares. It hands out immutable
//! [`Session`] snapshots, loads and persists the session cache, logs in when needed,
//! and makes sure at most one login is in flight at any time.
//!
//! Rejected credentials are remembered for the lifetime of the manager: after the
//! first rejection the manager serves anonymous sessions and never logs in again.

mod identity;
mod store;

pub use identity::random_user_agent;
pub use store::{CachedSession, SessionStore};

use crate::config::{Credentials, SessionConfig};
use crate::error::UpstreamError;
use crate::provider::MetadataProvider;
use crate::retry::{Attempt, RetryError, with_retry};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Snapshot of upstream authentication state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    authenticated: bool,
    cookies: String,
    acquired_at: DateTime<Utc>,
    ttl: Duration,
    user_agent: String,
    generation: u64,
}

impl Session {
    /// Build a session snapshot
    pub fn new(
        authenticated: bool,
        cookies: impl Into<String>,
        acquired_at: DateTime<Utc>,
        ttl: Duration,
        user_agent: impl Into<String>,
        generation: u64,
    ) -> Self {
        Self {
            authenticated,
            cookies: cookies.into(),
            acquired_at,
            ttl,
            user_agent: user_agent.into(),
            generation,
        }
    }

    /// Anonymous session with a fresh client identity
    pub fn anonymous(ttl: Duration, generation: u64) -> Self {
        Self::new(false, "", Utc::now(), ttl, random_user_agent(), generation)
    }

    /// Whether the session carries login cookies
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Cookie header value (empty for anonymous sessions)
    pub fn cookies(&self) -> &str {
        &self.cookies
    }

    /// Value of one cookie from the blob
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value)
        })
    }

    /// User agent to send with every request made under this session
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// When the session was acquired
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Monotonic id distinguishing this session from the ones it replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Time since acquisition (zero if the clock went backwards)
    pub fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the session is still inside its validity window
    pub fn is_valid(&self) -> bool {
        self.age() < self.ttl
    }
}

struct SessionState {
    current: Option<Arc<Session>>,
    credentials_rejected: bool,
    next_generation: u64,
}

impl SessionState {
    fn take_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Owns and refreshes the shared upstream session
pub struct SessionManager {
    provider: Arc<dyn MetadataProvider>,
    credentials: Option<Credentials>,
    config: SessionConfig,
    store: SessionStore,
    state: Mutex<SessionState>,
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Create a manager; no I/O happens until the first [`ensure_session`](Self::ensure_session)
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        credentials: Option<Credentials>,
        config: SessionConfig,
    ) -> Self {
        let store = SessionStore::new(config.cache_path.clone());
        Self {
            provider,
            credentials,
            config,
            store,
            state: Mutex::new(SessionState {
                current: None,
                credentials_rejected: false,
                next_generation: 0,
            }),
            shutdown: CancellationToken::new(),
        }
    }

    /// Return a valid session, loading or logging in as needed
    ///
    /// Order of preference: the in-memory session while it is valid, then the cache
    /// file while it is younger than the TTL, then a fresh login. Without usable
    /// credentials the result is an anonymous session.
    pub async fn ensure_session(&self) -> Arc<Session> {
        let mut state = self.state.lock().await;

        if let Some(current) = state.current.as_ref().filter(|s| s.is_valid()) {
            return Arc::clone(current);
        }

        if let Some(session) = self.load_cached(&mut state).await {
            state.current = Some(Arc::clone(&session));
            return session;
        }

        self.acquire(&mut state).await
    }

    /// Replace a session upstream refused
    ///
    /// If another caller already replaced `stale`, the replacement is returned as is.
    /// Otherwise the cached session is discarded from memory and disk and a new one is
    /// acquired with the login retry policy.
    pub async fn invalidate_and_reauthenticate(&self, stale: &Session) -> Arc<Session> {
        let mut state = self.state.lock().await;

        if let Some(current) = state.current.as_ref()
            && current.generation() != stale.generation()
        {
            debug!(
                generation = current.generation(),
                "Session already replaced by a concurrent caller"
            );
            return Arc::clone(current);
        }

        info!(generation = stale.generation(), "Invalidating upstream session");
        state.current = None;
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to remove session cache");
        }

        self.acquire(&mut state).await
    }

    /// Whether upstream has rejected the configured credentials
    pub async fn credentials_rejected(&self) -> bool {
        self.state.lock().await.credentials_rejected
    }

    /// Abort any login retry currently waiting on backoff
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn load_cached(&self, state: &mut SessionState) -> Option<Arc<Session>> {
        let credentials = self.credentials.as_ref()?;
        if state.credentials_rejected {
            return None;
        }
        let cached = self.store.load().await?;

        if cached.username != credentials.username {
            debug!("Session cache belongs to another account, ignoring");
            return None;
        }

        let session = Session::new(
            true,
            cached.cookies,
            cached.acquired_at,
            self.config.ttl,
            cached.user_agent,
            state.take_generation(),
        );
        if !session.is_valid() {
            debug!(age_secs = session.age().as_secs(), "Session cache expired");
            return None;
        }

        info!(
            generation = session.generation(),
            "Loaded upstream session from cache"
        );
        Some(Arc::new(session))
    }

    /// Log in if possible, falling back to an anonymous session
    ///
    /// The result becomes the current session, except for the anonymous fallback after
    /// a transient login failure: that one serves only the caller, so the next
    /// [`ensure_session`](Self::ensure_session) tries to log in again.
    async fn acquire(&self, state: &mut SessionState) -> Arc<Session> {
        let credentials = match &self.credentials {
            Some(c) if !state.credentials_rejected => c,
            _ => {
                let session = Arc::new(Session::anonymous(self.config.ttl, state.take_generation()));
                state.current = Some(Arc::clone(&session));
                return session;
            }
        };

        let user_agent = random_user_agent();
        let result = with_retry(&self.config.login_retry, &self.shutdown, move |attempt| async move {
            debug!(attempt, "Logging in upstream");
            Attempt::from(self.provider.login(credentials, user_agent).await)
        })
        .await;

        match result {
            Ok(cookies) => {
                let session = Session::new(
                    true,
                    cookies,
                    Utc::now(),
                    self.config.ttl,
                    user_agent,
                    state.take_generation(),
                );
                info!(generation = session.generation(), "Logged in upstream");

                let cached = CachedSession {
                    cookies: session.cookies().to_string(),
                    user_agent: session.user_agent().to_string(),
                    username: credentials.username.clone(),
                    acquired_at: session.acquired_at(),
                };
                if let Err(e) = self.store.save(&cached).await {
                    warn!(error = %e, "Failed to persist session cache");
                }
                let session = Arc::new(session);
                state.current = Some(Arc::clone(&session));
                session
            }
            Err(RetryError::Terminal(UpstreamError::BadCredentials(_))) => {
                error!(
                    "Upstream rejected the configured credentials; continuing anonymously \
                     without further login attempts"
                );
                state.credentials_rejected = true;
                let session = Arc::new(Session::anonymous(self.config.ttl, state.take_generation()));
                state.current = Some(Arc::clone(&session));
                session
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Login failed, serving this request anonymously; the next request logs in again"
                );
                state.current = None;
                Arc::new(Session::anonymous(self.config.ttl, state.take_generation()))
            }
        }
    }
}
