//! Configuration types for ig-relay

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

/// Environment variable holding the delivery bot token (required)
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
/// Environment variable holding the upstream username (optional)
pub const ENV_USERNAME: &str = "INSTAGRAM_USERNAME";
/// Environment variable holding the upstream password (optional)
pub const ENV_PASSWORD: &str = "INSTAGRAM_PASSWORD";
/// Environment variable overriding the session cache file location
pub const ENV_SESSION_FILE: &str = "IG_RELAY_SESSION_FILE";
/// Environment variable overriding the parent directory for batch temp dirs
pub const ENV_TEMP_DIR: &str = "IG_RELAY_TEMP_DIR";
/// Environment variable overriding the GraphQL document id (rotates upstream)
pub const ENV_DOC_ID: &str = "INSTAGRAM_DOC_ID";
/// Environment variable overriding the per-item size cap in MB
pub const ENV_MAX_FILE_MB: &str = "IG_RELAY_MAX_FILE_MB";

/// Upstream login credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// How the delay between attempts grows
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    /// `base * multiplier^(n-1)` after the n-th failed attempt
    Exponential {
        /// Growth factor per attempt (default: 2.0)
        multiplier: f64,
    },
    /// `base * n` after the n-th failed attempt
    Linear,
}

/// Bounded retry policy for a network-calling operation
///
/// `max_attempts` counts every call including the first one, so a policy with
/// `max_attempts: 3` performs at most two retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,

    /// Upper bound for a single delay before jitter (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Growth of the delay between attempts
    pub backoff: Backoff,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryPolicy {
    /// Exponential policy doubling from `base_delay`
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: default_max_delay(),
            backoff: Backoff::Exponential { multiplier: 2.0 },
            jitter: true,
        }
    }

    /// Linear policy growing by `base_delay` per failed attempt
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: default_max_delay(),
            backoff: Backoff::Linear,
            jitter: true,
        }
    }

    /// Same policy without jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay to wait after `failed_attempts` failures, before jitter
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let n = failed_attempts.max(1);
        match self.backoff {
            Backoff::Exponential { multiplier } => {
                let secs = self.base_delay.as_secs_f64() * multiplier.powi(n as i32 - 1);
                Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
            }
            Backoff::Linear => self.base_delay.saturating_mul(n).min(self.max_delay),
        }
    }
}

/// Session lifecycle settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session cache file (default: "./ig-relay-session.json")
    #[serde(default = "default_session_file")]
    pub cache_path: PathBuf,

    /// Session validity window (default: 24 hours)
    #[serde(default = "default_session_ttl", with = "duration_serde")]
    pub ttl: Duration,

    /// Login retry policy used during reauthentication (default: 3 attempts, 5s/10s/20s)
    #[serde(default = "default_login_retry")]
    pub login_retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_path: default_session_file(),
            ttl: default_session_ttl(),
            login_retry: default_login_retry(),
        }
    }
}

/// Post metadata retrieval settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upstream web origin (default: "https://www.instagram.com")
    #[serde(default = "default_upstream_base")]
    pub base_url: String,

    /// GraphQL document id for shortcode lookups
    #[serde(default = "default_doc_id")]
    pub doc_id: String,

    /// Web application id sent with every upstream request
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Retry policy for metadata fetches (default: 3 attempts, exponential from 2s)
    #[serde(default = "default_resolver_retry")]
    pub retry: RetryPolicy,

    /// Upper bound for one metadata request (default: 90 seconds)
    #[serde(default = "default_metadata_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base(),
            doc_id: default_doc_id(),
            app_id: default_app_id(),
            retry: default_resolver_retry(),
            request_timeout: default_metadata_timeout(),
        }
    }
}

/// Per-item download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Parent directory for per-batch temp dirs (None = system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Maximum accepted media size in bytes (default: 50 MB)
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// Retry policy for media fetches (default: 3 attempts, linear 1s)
    #[serde(default = "default_download_retry")]
    pub retry: RetryPolicy,

    /// Lower bound of the pause between items (default: 3 seconds)
    #[serde(default = "default_item_delay_min", with = "duration_serde")]
    pub item_delay_min: Duration,

    /// Upper bound of the pause between items (default: 7 seconds)
    #[serde(default = "default_item_delay_max", with = "duration_serde")]
    pub item_delay_max: Duration,

    /// Upper bound for one media request (default: 120 seconds)
    #[serde(default = "default_media_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_payload_bytes: default_max_payload_bytes(),
            retry: default_download_retry(),
            item_delay_min: default_item_delay_min(),
            item_delay_max: default_item_delay_max(),
            request_timeout: default_media_timeout(),
        }
    }
}

/// Delivery channel settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Bot API origin (default: "https://api.telegram.org")
    #[serde(default = "default_bot_api_base")]
    pub api_base: String,

    /// Upper bound for one upload (default: 120 seconds)
    #[serde(default = "default_media_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_base: default_bot_api_base(),
            request_timeout: default_media_timeout(),
        }
    }
}

/// Main configuration for the relay
///
/// Fields are organized into sub-configs, one per pipeline stage:
/// - [`session`](SessionConfig) - cache file, TTL, login retry
/// - [`resolver`](ResolverConfig) - upstream endpoints and metadata retry
/// - [`download`](DownloadConfig) - size cap, media retry, pacing
/// - [`delivery`](DeliveryConfig) - bot API endpoint
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Delivery bot token (required)
    pub bot_token: String,

    /// Upstream credentials (None = anonymous session only)
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Session lifecycle
    #[serde(default)]
    pub session: SessionConfig,

    /// Metadata retrieval
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Media download
    #[serde(default)]
    pub download: DownloadConfig,

    /// Delivery channel
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"[REDACTED]")
            .field("credentials", &self.credentials)
            .field("session", &self.session)
            .field("resolver", &self.resolver)
            .field("download", &self.download)
            .field("delivery", &self.delivery)
            .finish()
    }
}

impl Config {
    /// Build configuration from the process environment, loading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// Fails if the bot token is missing. A username without a password (or the
    /// reverse) is ignored with a warning and the relay runs anonymously.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Passwords are taken verbatim; whitespace only decides whether a value is set
        let raw = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let non_empty = |key: &str| raw(key).map(|v| v.trim().to_string());

        let bot_token = non_empty(ENV_BOT_TOKEN).ok_or_else(|| Error::Config {
            message: format!("{ENV_BOT_TOKEN} is not set"),
            key: Some(ENV_BOT_TOKEN.to_string()),
        })?;

        let credentials = match (non_empty(ENV_USERNAME), raw(ENV_PASSWORD)) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "Only one of {} / {} is set, running with an anonymous session",
                    ENV_USERNAME,
                    ENV_PASSWORD
                );
                None
            }
        };

        let mut config = Config {
            bot_token,
            credentials,
            ..Config::default()
        };

        if let Some(path) = non_empty(ENV_SESSION_FILE) {
            config.session.cache_path = PathBuf::from(path);
        }
        if let Some(dir) = non_empty(ENV_TEMP_DIR) {
            config.download.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(doc_id) = non_empty(ENV_DOC_ID) {
            config.resolver.doc_id = doc_id;
        }
        if let Some(raw) = non_empty(ENV_MAX_FILE_MB) {
            let mb: u64 = raw.parse().map_err(|_| Error::Config {
                message: format!("{ENV_MAX_FILE_MB} must be a whole number of megabytes, got {raw:?}"),
                key: Some(ENV_MAX_FILE_MB.to_string()),
            })?;
            config.download.max_payload_bytes = mb * 1024 * 1024;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            return Err(config_error("bot token must not be empty", "bot_token"));
        }
        for (key, policy) in [
            ("session.login_retry", &self.session.login_retry),
            ("resolver.retry", &self.resolver.retry),
            ("download.retry", &self.download.retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(config_error("max_attempts must be at least 1", key));
            }
        }
        if self.download.max_payload_bytes == 0 {
            return Err(config_error(
                "max_payload_bytes must be greater than zero",
                "download.max_payload_bytes",
            ));
        }
        if self.download.item_delay_min > self.download.item_delay_max {
            return Err(config_error(
                "item_delay_min must not exceed item_delay_max",
                "download.item_delay_min",
            ));
        }
        if self.session.ttl.is_zero() {
            return Err(config_error("ttl must be greater than zero", "session.ttl"));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_session_file() -> PathBuf {
    PathBuf::from("./ig-relay-session.json")
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_login_retry() -> RetryPolicy {
    RetryPolicy::exponential(3, Duration::from_secs(5))
}

fn default_upstream_base() -> String {
    "https://www.instagram.com".to_string()
}

fn default_doc_id() -> String {
    "8845758582119845".to_string()
}

fn default_app_id() -> String {
    "936619743392459".to_string()
}

fn default_resolver_retry() -> RetryPolicy {
    RetryPolicy::exponential(3, Duration::from_secs(2))
}

fn default_metadata_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_max_payload_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_download_retry() -> RetryPolicy {
    RetryPolicy::linear(3, Duration::from_secs(1))
}

fn default_item_delay_min() -> Duration {
    Duration::from_secs(3)
}

fn default_item_delay_max() -> Duration {
    Duration::from_secs(7)
}

fn default_media_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_bot_api_base() -> String {
    "https://api.telegram.org".to_string()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_bot_token_is_a_config_error() {
        let result = Config::from_lookup(lookup_from(&[]));

        match result {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some(ENV_BOT_TOKEN)),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn blank_bot_token_is_a_config_error() {
        let result = Config::from_lookup(lookup_from(&[(ENV_BOT_TOKEN, "   ")]));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn token_only_runs_anonymously_with_defaults() {
        let config = Config::from_lookup(lookup_from(&[(ENV_BOT_TOKEN, "123:abc")])).unwrap();

        assert_eq!(config.bot_token, "123:abc");
        assert!(config.credentials.is_none());
        assert_eq!(config.session.ttl, Duration::from_secs(86_400));
        assert_eq!(config.download.max_payload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.download.retry.max_attempts, 3);
        assert_eq!(config.session.login_retry.base_delay, Duration::from_secs(5));
    }

    #[test]
    fn credentials_require_both_halves() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_BOT_TOKEN, "t"),
            (ENV_USERNAME, "someone"),
        ]))
        .unwrap();
        assert!(
            config.credentials.is_none(),
            "username without password must fall back to anonymous"
        );

        let config = Config::from_lookup(lookup_from(&[
            (ENV_BOT_TOKEN, "t"),
            (ENV_USERNAME, "someone"),
            (ENV_PASSWORD, "hunter2"),
        ]))
        .unwrap();
        let creds = config.credentials.unwrap();
        assert_eq!(creds.username, "someone");
        assert_eq!(creds.password, "hunter2");
    }

    #[test]
    fn password_whitespace_is_preserved() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_BOT_TOKEN, " t "),
            (ENV_USERNAME, " someone "),
            (ENV_PASSWORD, "  pass word "),
        ]))
        .unwrap();
        let creds = config.credentials.unwrap();
        assert_eq!(config.bot_token, "t");
        assert_eq!(creds.username, "someone");
        assert_eq!(creds.password, "  pass word ");

        let config = Config::from_lookup(lookup_from(&[
            (ENV_BOT_TOKEN, "t"),
            (ENV_USERNAME, "someone"),
            (ENV_PASSWORD, "   "),
        ]))
        .unwrap();
        assert!(config.credentials.is_none(), "blank password counts as unset");
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_BOT_TOKEN, "t"),
            (ENV_SESSION_FILE, "/var/lib/relay/session.json"),
            (ENV_TEMP_DIR, "/var/tmp/relay"),
            (ENV_DOC_ID, "123456"),
            (ENV_MAX_FILE_MB, "20"),
        ]))
        .unwrap();

        assert_eq!(
            config.session.cache_path,
            PathBuf::from("/var/lib/relay/session.json")
        );
        assert_eq!(config.download.temp_dir, Some(PathBuf::from("/var/tmp/relay")));
        assert_eq!(config.resolver.doc_id, "123456");
        assert_eq!(config.download.max_payload_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn non_numeric_size_cap_is_rejected() {
        let result = Config::from_lookup(lookup_from(&[
            (ENV_BOT_TOKEN, "t"),
            (ENV_MAX_FILE_MB, "lots"),
        ]));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = Config::from_lookup(lookup_from(&[
            (ENV_BOT_TOKEN, "123:secret-token"),
            (ENV_USERNAME, "someone"),
            (ENV_PASSWORD, "hunter2"),
        ]))
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("someone"));
    }

    #[test]
    fn validate_rejects_zero_attempts_and_inverted_delays() {
        let mut config = Config {
            bot_token: "t".into(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.resolver.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.resolver.retry.max_attempts = 3;
        config.download.item_delay_min = Duration::from_secs(10);
        config.download.item_delay_max = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    // --- RetryPolicy delays ---

    #[test]
    fn exponential_delays_double_from_base() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(5));

        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
    }

    #[test]
    fn linear_delays_grow_by_base() {
        let policy = RetryPolicy::linear(3, Duration::from_secs(1));

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
    }

    #[test]
    fn delays_are_capped_at_max_delay() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(30),
            ..RetryPolicy::exponential(10, Duration::from_secs(5))
        };
        assert_eq!(policy.delay_for(8), Duration::from_secs(30));
    }

    // --- Duration serde helpers ---

    #[test]
    fn retry_policy_serializes_durations_as_seconds() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(5));

        let json = serde_json::to_value(&policy).expect("serialize failed");

        assert_eq!(json["base_delay"], 5);
        assert_eq!(json["max_delay"], 60);
        assert_eq!(json["backoff"]["kind"], "exponential");
    }

    #[test]
    fn config_deserializes_with_partial_sections() {
        let json = r#"{
            "bot_token": "t",
            "session": {"ttl": 3600},
            "download": {"max_payload_bytes": 1024}
        }"#;

        let config: Config = serde_json::from_str(json).expect("deserialize failed");

        assert_eq!(config.session.ttl, Duration::from_secs(3600));
        assert_eq!(config.download.max_payload_bytes, 1024);
        assert_eq!(config.resolver.base_url, "https://www.instagram.com");
        assert_eq!(config.download.retry.backoff, Backoff::Linear);
    }
}
