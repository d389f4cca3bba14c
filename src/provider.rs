//! Upstream metadata provider
//!
//! The [`MetadataProvider`] trait is the seam between the pipeline and the platform:
//! it fetches raw post documents and performs logins, and classifies every failure
//! into an [`UpstreamError`] class. [`HttpMetadataProvider`] talks to the public web
//! endpoints.

use crate::config::{Credentials, ResolverConfig};
use crate::error::{Result, UpstreamError};
use crate::session::Session;
use crate::types::{ContentIdentifier, ContentKind};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, IntoHeaderName, SET_COOKIE, USER_AGENT};
use serde_json::Value;
use tracing::debug;

/// Source of post metadata and login sessions
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Fetch the raw metadata document for one post or story
    async fn fetch_post(
        &self,
        id: &ContentIdentifier,
        session: &Session,
    ) -> std::result::Result<Value, UpstreamError>;

    /// Log in and return the session cookie blob (`name=value; name=value`)
    async fn login(
        &self,
        credentials: &Credentials,
        user_agent: &str,
    ) -> std::result::Result<String, UpstreamError>;
}

/// [`MetadataProvider`] backed by the platform's web endpoints
#[derive(Clone, Debug)]
pub struct HttpMetadataProvider {
    client: reqwest::Client,
    base_url: String,
    doc_id: String,
    app_id: String,
}

impl HttpMetadataProvider {
    /// Create a provider from resolver settings
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            doc_id: config.doc_id.clone(),
            app_id: config.app_id.clone(),
        })
    }

    fn session_headers(&self, session: &Session) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, USER_AGENT, session.user_agent());
        insert_header(&mut headers, "x-ig-app-id", &self.app_id);
        if !session.cookies().is_empty() {
            insert_header(&mut headers, COOKIE, session.cookies());
        }
        if let Some(token) = session.cookie("csrftoken") {
            insert_header(&mut headers, "x-csrftoken", token);
        }
        headers
    }

    async fn read_json(
        response: reqwest::Response,
    ) -> std::result::Result<Value, UpstreamError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::from_status(status.as_u16(), &body));
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Unexpected(format!("invalid JSON: {e}")))?;

        // Some endpoints answer 200 with a login wall instead of a status code
        if json.get("require_login").and_then(Value::as_bool) == Some(true)
            || json.get("message").and_then(Value::as_str) == Some("login_required")
        {
            return Err(UpstreamError::Unauthorized {
                status: status.as_u16(),
            });
        }
        Ok(json)
    }

    async fn csrf_token(&self, user_agent: &str) -> std::result::Result<String, UpstreamError> {
        let response = self
            .client
            .get(format!("{}/accounts/login/", self.base_url))
            .header(USER_AGENT, user_agent)
            .send()
            .await?;

        let token = set_cookies(response.headers())
            .into_iter()
            .find_map(|(name, value)| (name == "csrftoken").then_some(value));

        Ok(token.unwrap_or_else(generate_csrf_token))
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn fetch_post(
        &self,
        id: &ContentIdentifier,
        session: &Session,
    ) -> std::result::Result<Value, UpstreamError> {
        let request = match id.kind() {
            ContentKind::Story => self
                .client
                .get(format!("{}/api/v1/media/{}/info/", self.base_url, id.code())),
            ContentKind::Post | ContentKind::Reel | ContentKind::Tv => {
                let variables = serde_json::json!({ "shortcode": id.code() }).to_string();
                self.client
                    .post(format!("{}/api/graphql", self.base_url))
                    .form(&[("doc_id", self.doc_id.as_str()), ("variables", variables.as_str())])
            }
        };

        debug!(shortcode = %id, kind = ?id.kind(), "Fetching post metadata");
        let response = request.headers(self.session_headers(session)).send().await?;
        Self::read_json(response).await
    }

    async fn login(
        &self,
        credentials: &Credentials,
        user_agent: &str,
    ) -> std::result::Result<String, UpstreamError> {
        let csrf = self.csrf_token(user_agent).await?;
        let enc_password = format!(
            "#PWD_INSTAGRAM_BROWSER:0:{}:{}",
            chrono::Utc::now().timestamp(),
            credentials.password
        );

        let response = self
            .client
            .post(format!("{}/api/v1/web/accounts/login/ajax/", self.base_url))
            .header(USER_AGENT, user_agent)
            .header("x-ig-app-id", &self.app_id)
            .header("x-csrftoken", &csrf)
            .header(COOKIE, format!("csrftoken={csrf}"))
            .form(&[
                ("username", credentials.username.as_str()),
                ("enc_password", enc_password.as_str()),
                ("queryParams", "{}"),
                ("optIntoOneTap", "false"),
            ])
            .send()
            .await?;

        let status = response.status();
        let mut cookies = set_cookies(response.headers());
        let body = response.text().await?;
        let json: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

        let rejected = json.get("authenticated").and_then(Value::as_bool) == Some(false)
            || json.get("invalid_credentials").and_then(Value::as_bool) == Some(true);
        if rejected {
            return Err(UpstreamError::BadCredentials(credentials.username.clone()));
        }
        if !status.is_success() {
            return Err(UpstreamError::from_status(status.as_u16(), &body));
        }
        if json.get("authenticated").and_then(Value::as_bool) != Some(true) {
            return Err(UpstreamError::Unexpected(
                "login response did not confirm authentication".to_string(),
            ));
        }

        if !cookies.iter().any(|(name, _)| name == "csrftoken") {
            cookies.push(("csrftoken".to_string(), csrf));
        }
        if !cookies.iter().any(|(name, _)| name == "sessionid") {
            return Err(UpstreamError::Unexpected(
                "login response carried no session cookie".to_string(),
            ));
        }

        Ok(cookies
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "))
    }
}

fn insert_header<K: IntoHeaderName>(headers: &mut HeaderMap, name: K, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// `name=value` pairs from `Set-Cookie` headers, skipping deletions
fn set_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|raw| {
            let pair = raw.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            let value = value.trim_matches('"');
            (!name.is_empty() && !value.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

fn generate_csrf_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
