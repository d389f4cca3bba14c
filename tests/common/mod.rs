//! Common test utilities: one wiremock server standing in for the platform's web
//! endpoints, its media CDN and the Bot API.

#![allow(dead_code)]

use ig_relay::{Config, Credentials, Downloader, RetryPolicy, TelegramChannel};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const BOT_TOKEN: &str = "123456:TEST";
pub const CHAT_ID: &str = "-100200300";

/// Mock upstream plus the scratch directory for session cache and staged files
pub struct Upstream {
    pub server: MockServer,
    pub dir: TempDir,
}

impl Upstream {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    /// Config pointed at the mock server with short retry delays and no pacing
    pub fn config(&self, credentials: Option<Credentials>) -> Config {
        let fast = RetryPolicy::exponential(3, Duration::from_millis(10)).without_jitter();
        let mut config = Config {
            bot_token: BOT_TOKEN.to_string(),
            credentials,
            ..Config::default()
        };
        config.session.cache_path = self.dir.path().join("session.json");
        config.session.login_retry = fast.clone();
        config.resolver.base_url = self.server.uri();
        config.resolver.retry = fast;
        config.download.retry = RetryPolicy::linear(3, Duration::from_millis(10)).without_jitter();
        config.download.temp_dir = Some(self.dir.path().to_path_buf());
        config.download.item_delay_min = Duration::ZERO;
        config.download.item_delay_max = Duration::ZERO;
        config.delivery.api_base = self.server.uri();
        config
    }

    pub fn downloader(&self, credentials: Option<Credentials>) -> Downloader {
        Downloader::new(self.config(credentials)).expect("valid config")
    }

    pub fn channel(&self) -> TelegramChannel {
        TelegramChannel::new(&self.config(None).delivery, BOT_TOKEN, CHAT_ID).expect("channel")
    }

    pub fn media_url(&self, name: &str) -> String {
        format!("{}/cdn/{name}", self.server.uri())
    }

    pub async fn mount_post(&self, doc: Value) {
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(doc))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_media(&self, name: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/cdn/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    /// CSRF bootstrap plus a login that succeeds with `sessionid={session_id}`
    pub async fn mount_login(&self, session_id: &str) {
        self.mount_csrf().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/web/accounts/login/ajax/"))
            .respond_with(login_ok(session_id))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_csrf(&self) {
        Mock::given(method("GET"))
            .and(path("/accounts/login/"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "csrftoken=tok; Path=/"),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mount_telegram(&self) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/bot.+/send(Photo|Video)$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&self.server)
            .await;
    }

    async fn requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Bot API uploads in arrival order, as `(method, body)` pairs
    pub async fn uploads(&self) -> Vec<(String, String)> {
        self.requests()
            .await
            .into_iter()
            .filter(|r| r.url.path().starts_with("/bot"))
            .map(|r| {
                let method = r.url.path().rsplit('/').next().unwrap_or_default().to_string();
                (method, String::from_utf8_lossy(&r.body).into_owned())
            })
            .collect()
    }

    pub async fn login_count(&self) -> usize {
        self.count(|r| r.url.path() == "/api/v1/web/accounts/login/ajax/").await
    }

    pub async fn media_fetch_count(&self) -> usize {
        self.count(|r| r.url.path().starts_with("/cdn/")).await
    }

    async fn count(&self, pred: impl Fn(&Request) -> bool) -> usize {
        self.requests().await.iter().filter(|r| pred(r)).count()
    }
}

pub fn login_ok(session_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("set-cookie", format!("sessionid={session_id}; Path=/; HttpOnly").as_str())
        .set_body_json(json!({ "authenticated": true, "user": true, "status": "ok" }))
}

pub fn credentials() -> Credentials {
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

/// GraphQL post document; one child yields a single post, more yield a carousel
pub fn post_doc(children: &[(bool, String)], is_private: bool) -> Value {
    let node = |is_video: bool, url: &str| {
        if is_video {
            json!({ "is_video": true, "video_url": url, "display_url": "https://cdn.invalid/thumb.jpg" })
        } else {
            json!({ "is_video": false, "display_url": url })
        }
    };

    let mut media = match children {
        [(is_video, url)] => node(*is_video, url),
        _ => {
            let edges: Vec<Value> = children
                .iter()
                .map(|(is_video, url)| json!({ "node": node(*is_video, url) }))
                .collect();
            json!({
                "__typename": "XDTGraphSidecar",
                "is_video": false,
                "display_url": "https://cdn.invalid/cover.jpg",
                "edge_sidecar_to_children": { "edges": edges }
            })
        }
    };
    media["shortcode"] = json!("ABC123");
    media["owner"] = owner(is_private, false);
    json!({ "data": { "xdt_shortcode_media": media } })
}
