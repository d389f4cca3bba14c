//! Shared test helpers: a scripted metadata provider, a recording delivery channel
//! and upstream document fixtures.

use crate::config::{Config, Credentials, RetryPolicy};
use crate::delivery::DeliveryChannel;
use crate::error::{DeliveryError, UpstreamError};
use crate::provider::MetadataProvider;
use crate::session::Session;
use crate::types::{ContentIdentifier, MediaKind};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

type FetchResult = Result<Value, UpstreamError>;
type LoginResult = Result<String, UpstreamError>;

/// Provider that replays scripted responses and counts calls
///
/// When a script runs dry the last scripted answer is not repeated; fetches fall
/// back to `NotFound` and logins to a fixed cookie blob.
#[derive(Default)]
pub(crate) struct MockProvider {
    fetches: Mutex<VecDeque<FetchResult>>,
    logins: Mutex<VecDeque<LoginResult>>,
    login_delay: Option<Duration>,
    pub(crate) fetch_calls: AtomicU32,
    pub(crate) login_calls: AtomicU32,
    pub(crate) seen_generations: Mutex<Vec<u64>>,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_fetches(self, fetches: Vec<FetchResult>) -> Self {
        *self.fetches.lock().unwrap() = fetches.into();
        self
    }

    pub(crate) fn with_logins(self, logins: Vec<LoginResult>) -> Self {
        *self.logins.lock().unwrap() = logins.into();
        self
    }

    pub(crate) fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = Some(delay);
        self
    }

    pub(crate) fn fetch_count(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn login_count(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataProvider for MockProvider {
    async fn fetch_post(&self, _id: &ContentIdentifier, session: &Session) -> FetchResult {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_generations
            .lock()
            .unwrap()
            .push(session.generation());
        self.fetches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(UpstreamError::NotFound { status: 404 }))
    }

    async fn login(&self, _credentials: &Credentials, _user_agent: &str) -> LoginResult {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.login_delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.logins.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok("sessionid=mock; csrftoken=mock".to_string()))
    }
}

/// One recorded `send_media` call
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SentMedia {
    pub(crate) kind: MediaKind,
    pub(crate) caption: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) path: PathBuf,
}

/// Delivery channel that keeps what it receives, optionally refusing some ordinals
#[derive(Default)]
pub(crate) struct RecordingChannel {
    pub(crate) sent: Mutex<Vec<SentMedia>>,
    reject_captions: Vec<String>,
}

impl RecordingChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn rejecting(caption: &str) -> Self {
        Self {
            sent: Mutex::default(),
            reject_captions: vec![caption.to_string()],
        }
    }

    pub(crate) fn sent(&self) -> Vec<SentMedia> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send_media(
        &self,
        kind: MediaKind,
        path: &Path,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        if self.reject_captions.iter().any(|c| c == caption) {
            return Err(DeliveryError::Rejected("file type not allowed".into()));
        }
        let bytes = tokio::fs::read(path).await?;
        self.sent.lock().unwrap().push(SentMedia {
            kind,
            caption: caption.to_string(),
            bytes,
            path: path.to_path_buf(),
        });
        Ok(())
    }
}

/// Retry policy with short fixed delays
pub(crate) fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::exponential(max_attempts, Duration::from_millis(10)).without_jitter()
}

/// Config wired for tests: tiny delays, cache and temp files under `dir`
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config {
        bot_token: "123:test".into(),
        ..Config::default()
    };
    config.session.cache_path = dir.join("session.json");
    config.session.login_retry = fast_retry(3);
    config.resolver.retry = fast_retry(3);
    config.download.retry = RetryPolicy::linear(3, Duration::from_millis(10)).without_jitter();
    config.download.temp_dir = Some(dir.to_path_buf());
    config.download.item_delay_min = Duration::ZERO;
    config.download.item_delay_max = Duration::ZERO;
    config
}

pub(crate) fn credentials() -> Credentials {
    Credentials {
        username: "someone".into(),
        password: "hunter2".into(),
    }
}

fn owner(is_private: bool, followed: bool) -> Value {
    json!({
        "username": "someone",
        "is_private": is_private,
        "followed_by_viewer": followed
    })
}

/// GraphQL document for a single-photo post
pub(crate) fn graphql_single(display_url: &str) -> Value {
    json!({
        "data": {
            "xdt_shortcode_media": {
                "__typename": "XDTGraphImage",
                "shortcode": "ABC123",
                "is_video": false,
                "display_url": display_url,
                "owner": owner(false, false)
            }
        }
    })
}

/// GraphQL document for a single-video post
pub(crate) fn graphql_video(video_url: &str) -> Value {
    json!({
        "data": {
            "xdt_shortcode_media": {
                "__typename": "XDTGraphVideo",
                "shortcode": "ABC123",
                "is_video": true,
                "video_url": video_url,
                "display_url": "https://cdn.example.com/thumb.jpg",
                "owner": owner(false, false)
            }
        }
    })
}

/// GraphQL carousel document; `children` are `(is_video, url)` pairs
pub(crate) fn graphql_carousel(children: &[(bool, &str)]) -> Value {
    let edges: Vec<Value> = children
        .iter()
        .map(|(is_video, url)| {
            let node = if *is_video {
                json!({
                    "is_video": true,
                    "video_url": url,
                    "display_url": "https://cdn.example.com/thumb.jpg"
                })
            } else {
                json!({ "is_video": false, "display_url": url })
            };
            json!({ "node": node })
        })
        .collect();

    json!({
        "data": {
            "xdt_shortcode_media": {
                "__typename": "XDTGraphSidecar",
                "shortcode": "ABC123",
                "is_video": false,
                "display_url": "https://cdn.example.com/cover.jpg",
                "owner": owner(false, false),
                "edge_sidecar_to_children": { "edges": edges }
            }
        }
    })
}

/// GraphQL single photo owned by a private account
pub(crate) fn graphql_private(followed: bool) -> Value {
    let mut doc = graphql_single("https://cdn.example.com/private.jpg");
    doc["data"]["xdt_shortcode_media"]["owner"] = owner(true, followed);
    doc
}

/// Private-API story document with one video item
pub(crate) fn v1_story_video(video_url: &str) -> Value {
    json!({
        "items": [{
            "pk": "3141592653",
            "media_type": 2,
            "video_versions": [{ "url": video_url, "width": 720 }],
            "image_versions2": { "candidates": [{ "url": "https://cdn.example.com/thumb.jpg" }] },
            "user": {
                "username": "someone",
                "is_private": false,
                "friendship_status": { "following": false }
            }
        }]
    })
}
