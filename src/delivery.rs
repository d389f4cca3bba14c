//! Delivery channels
//!
//! A [`DeliveryChannel`] accepts one staged media file at a time. [`TelegramChannel`]
//! uploads to a single chat through the Bot API.

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, Result};
use crate::types::MediaKind;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Sink for downloaded media
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Deliver the file at `path` with a caption
    async fn send_media(
        &self,
        kind: MediaKind,
        path: &Path,
        caption: &str,
    ) -> std::result::Result<(), DeliveryError>;
}

/// Bot API reply envelope
#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Uploads media to one Telegram chat
#[derive(Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("api_base", &self.api_base)
            .field("bot_token", &"[REDACTED]")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl TelegramChannel {
    /// Channel posting to `chat_id` (numeric id or `@channelname`)
    pub fn new(
        config: &DeliveryConfig,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    fn method_url(kind: MediaKind, api_base: &str, token: &str) -> String {
        let method = match kind {
            MediaKind::Video => "sendVideo",
            MediaKind::Photo => "sendPhoto",
        };
        format!("{api_base}/bot{token}/{method}")
    }
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    async fn send_media(
        &self,
        kind: MediaKind,
        path: &Path,
        caption: &str,
    ) -> std::result::Result<(), DeliveryError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("media.{}", kind.extension()));

        let field = match kind {
            MediaKind::Video => "video",
            MediaKind::Photo => "photo",
        };
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part(field, Part::bytes(bytes).file_name(file_name));

        debug!(%kind, caption, "Uploading media to Telegram");
        let response = self
            .client
            .post(Self::method_url(kind, &self.api_base, &self.bot_token))
            .multipart(form)
            .send()
            .await
            // The request URL embeds the bot token
            .map_err(|e| DeliveryError::Unreachable(e.without_url().to_string()))?;

        let status = response.status();
        let reply: Option<ApiReply> = response.json().await.ok();
        match reply {
            Some(ApiReply { ok: true, .. }) if status.is_success() => Ok(()),
            Some(ApiReply { description, .. }) => Err(DeliveryError::Rejected(
                description.unwrap_or_else(|| format!("HTTP {status}")),
            )),
            None => Err(DeliveryError::Rejected(format!(
                "HTTP {status} with unreadable body"
            ))),
        }
    }
}
