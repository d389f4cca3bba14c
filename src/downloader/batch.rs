//! One URL end to end
//!
//! A batch runs strictly in sequence: classify the URL, make sure a session exists,
//! resolve the post, enumerate its media, then fetch and relay each item with a
//! jittered pause between items. Per-item failures are recorded and the batch
//! moves on; only failures before the first item abort the batch.

use super::Downloader;
use super::fetch::fetch_to_file;
use crate::classifier::classify;
use crate::delivery::DeliveryChannel;
use crate::enumerator::enumerate;
use crate::error::{Error, Result};
use crate::resolver::Resolution;
use crate::retry::{RetryError, random_delay, sleep_or_cancel};
use crate::types::{
    BatchResult, ContentIdentifier, DownloadOutcome, FailureReason, MediaDescriptor,
};
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl Downloader {
    /// Relay every media item behind `url` to `channel`
    pub async fn run(&self, url: &str, channel: &dyn DeliveryChannel) -> BatchResult {
        self.run_with_cancel(url, channel, CancellationToken::new())
            .await
    }

    /// Same as [`run`](Self::run), stopping promptly once `cancel` fires
    ///
    /// Items not yet started when the token fires are not recorded; the result is
    /// aggregated from the items that were.
    pub async fn run_with_cancel(
        &self,
        url: &str,
        channel: &dyn DeliveryChannel,
        cancel: CancellationToken,
    ) -> BatchResult {
        let Some(id) = classify(url) else {
            info!(url, "Unrecognized URL");
            return BatchResult::aborted(&Error::MalformedInput(url.to_string()));
        };

        let items = match self.prepare(&id, &cancel).await {
            Ok(items) => items,
            Err(e) => {
                match &e {
                    Error::PrivateAccount { .. } | Error::NotFound(_) | Error::Cancelled => {
                        info!(shortcode = %id, reason = e.error_code(), "Batch stopped before download")
                    }
                    _ => error!(shortcode = %id, error = %e, "Failed to resolve post"),
                }
                return BatchResult::aborted(&e);
            }
        };
        if items.is_empty() {
            warn!(shortcode = %id, "Post resolved but no media could be enumerated");
            return BatchResult::no_media();
        }

        let batch_dir = match self.batch_dir().await {
            Ok(dir) => dir,
            Err(e) => {
                error!(shortcode = %id, error = %e, "Failed to create batch directory");
                return BatchResult::aborted(&e);
            }
        };

        info!(shortcode = %id, items = items.len(), "Starting batch");
        let total = items.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut cancelled = false;

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let outcome = self
                .relay_item(&id, item, batch_dir.path(), channel, &cancel)
                .await;
            let interrupted = outcome.failure == Some(FailureReason::Cancelled);
            outcomes.push(outcome);
            if interrupted {
                cancelled = true;
                break;
            }

            // Pause only between items; nothing follows the last one
            if index + 1 < total {
                let delay = random_delay(
                    self.config.download.item_delay_min,
                    self.config.download.item_delay_max,
                );
                debug!(delay_ms = delay.as_millis(), "Pausing before next item");
                if !sleep_or_cancel(delay, &cancel).await {
                    cancelled = true;
                    break;
                }
            }
        }

        if let Err(e) = batch_dir.close() {
            warn!(error = %e, "Failed to remove batch directory");
        }

        let result = BatchResult::from_outcomes(outcomes, cancelled);
        info!(
            shortcode = %id,
            status = ?result.status,
            succeeded = result.succeeded(),
            total,
            cancelled,
            "Batch finished"
        );
        result
    }

    /// Session, resolution and enumeration
    async fn prepare(
        &self,
        id: &ContentIdentifier,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaDescriptor>> {
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            session = self.sessions.ensure_session() => session,
        };

        match self.resolver.resolve(id, session, cancel).await? {
            Resolution::Post(post) => Ok(enumerate(&post)),
            Resolution::PrivateAccount {
                username,
                profile_url,
            } => Err(Error::PrivateAccount {
                username,
                profile_url,
            }),
            Resolution::NotFound => Err(Error::NotFound(id.to_string())),
        }
    }

    /// Scoped directory for this batch's staged files, removed when dropped
    async fn batch_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ig-relay-");
        match &self.config.download.temp_dir {
            Some(parent) => {
                tokio::fs::create_dir_all(parent).await?;
                Ok(builder.tempdir_in(parent)?)
            }
            None => Ok(builder.tempdir()?),
        }
    }

    /// Fetch one item and hand it to the channel
    async fn relay_item(
        &self,
        id: &ContentIdentifier,
        item: &MediaDescriptor,
        dir: &Path,
        channel: &dyn DeliveryChannel,
        cancel: &CancellationToken,
    ) -> DownloadOutcome {
        let dest = dir.join(format!(
            "{}_{}.{}",
            id.code(),
            item.ordinal,
            item.kind.extension()
        ));

        let fetched = fetch_to_file(
            &self.media_client,
            &item.source_url,
            &dest,
            self.config.download.max_payload_bytes,
            &self.config.download.retry,
            cancel,
        )
        .await;

        let size = match fetched {
            Ok(size) => size,
            Err(RetryError::Cancelled) => {
                return DownloadOutcome::failed(item, FailureReason::Cancelled, 0);
            }
            Err(RetryError::Terminal(e) | RetryError::Exhausted { last: e, .. }) => {
                let reason = FailureReason::from(&e);
                let e = Error::from(e);
                warn!(
                    shortcode = %id,
                    ordinal = item.ordinal,
                    code = e.error_code(),
                    error = %e,
                    "Media download failed"
                );
                return DownloadOutcome::failed(item, reason, 0);
            }
        };

        let caption = item.caption();
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = channel.send_media(item.kind, &dest, &caption) => Some(result),
        };
        if let Err(e) = tokio::fs::remove_file(&dest).await {
            debug!(error = %e, "Failed to remove staged file");
        }

        match sent {
            Some(Ok(())) => {
                info!(shortcode = %id, ordinal = item.ordinal, kind = %item.kind, size_bytes = size, "Item delivered");
                DownloadOutcome::delivered(item, size)
            }
            Some(Err(e)) => {
                error!(shortcode = %id, ordinal = item.ordinal, error = %e, "Delivery failed");
                DownloadOutcome::failed(item, FailureReason::Delivery, size)
            }
            None => DownloadOutcome::failed(item, FailureReason::Cancelled, size),
        }
    }
}
