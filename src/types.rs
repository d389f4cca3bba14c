//! Core types for ig-relay

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which URL pattern produced an identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Regular feed post (`/p/{code}/`)
    Post,
    /// Short-form video (`/reel/{code}/`)
    Reel,
    /// Long-form video (`/tv/{code}/`)
    Tv,
    /// Story item (`/stories/{user}/{id}/`)
    Story,
}

/// Platform-assigned identifier of one post or story
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentIdentifier {
    kind: ContentKind,
    code: String,
    owner_hint: Option<String>,
}

impl ContentIdentifier {
    /// Identifier for a shortcode-addressed post, reel or video
    pub fn shortcode(kind: ContentKind, code: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            owner_hint: None,
        }
    }

    /// Identifier for a story item, which is addressed by media id and owner
    pub fn story(username: impl Into<String>, media_id: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Story,
            code: media_id.into(),
            owner_hint: Some(username.into()),
        }
    }

    /// The pattern that matched
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Shortcode, or numeric media id for stories
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Owner username taken from the URL path (stories only)
    pub fn owner_hint(&self) -> Option<&str> {
        self.owner_hint.as_deref()
    }
}

impl fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

/// Media type of one item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Video file
    Video,
    /// Still image
    Photo,
}

impl MediaKind {
    /// File extension used when staging the item
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Photo => "jpg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => f.write_str("video"),
            MediaKind::Photo => f.write_str("photo"),
        }
    }
}

/// Owner of a post as seen by the active session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Account username
    pub username: String,
    /// Whether the account is private
    pub is_private: bool,
    /// Whether the session's account follows the owner
    pub viewer_follows: bool,
}

impl Owner {
    /// Public profile URL of the owner
    pub fn profile_url(&self) -> String {
        format!("https://www.instagram.com/{}/", self.username)
    }
}

/// Post metadata as resolved for one request
///
/// `nodes` holds the raw upstream media nodes in upstream order: the carousel
/// children for a carousel post, otherwise the post's own media object.
#[derive(Clone, Debug, PartialEq)]
pub struct PostMetadata {
    /// What was requested
    pub identifier: ContentIdentifier,
    /// Whether the post bundles several media children
    pub is_carousel: bool,
    /// Post owner
    pub owner: Owner,
    /// Raw media nodes, parsed later by the enumerator
    pub nodes: Vec<serde_json::Value>,
}

/// One downloadable media item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Media type
    pub kind: MediaKind,
    /// Where to fetch the item
    pub source_url: String,
    /// Position in the batch, starting at 1
    pub ordinal: usize,
    /// Number of items in the batch
    pub total: usize,
}

impl MediaDescriptor {
    /// Caption attached to the delivered item
    pub fn caption(&self) -> String {
        format!("{}/{}", self.ordinal, self.total)
    }
}

/// Why an item failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "reason")]
pub enum FailureReason {
    /// Declared or observed size exceeds the cap
    TooLarge {
        /// Size in bytes
        size_bytes: u64,
    },
    /// Transport failure after all retries
    Network,
    /// Media host answered with a non-success status
    HttpStatus {
        /// Status code
        status: u16,
    },
    /// The item could not be staged on disk
    Storage,
    /// The delivery channel did not accept the item
    Delivery,
    /// The batch was cancelled while the item was in progress
    Cancelled,
}

impl FailureReason {
    /// Stable short code
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::TooLarge { .. } => "too-large",
            FailureReason::Network => "network",
            FailureReason::HttpStatus { .. } => "http-status",
            FailureReason::Storage => "storage",
            FailureReason::Delivery => "delivery",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::TooLarge { size_bytes } => write!(
                f,
                "too-large ({:.1} MB)",
                crate::error::bytes_to_mb(*size_bytes)
            ),
            FailureReason::HttpStatus { status } => write!(f, "http-status ({status})"),
            other => f.write_str(other.code()),
        }
    }
}

/// Result of processing one media item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// Position in the batch
    pub ordinal: usize,
    /// Media type
    pub kind: MediaKind,
    /// Whether the item reached the delivery channel
    pub success: bool,
    /// Why the item failed
    pub failure: Option<FailureReason>,
    /// Bytes downloaded (0 when nothing was streamed)
    pub byte_size: u64,
}

impl DownloadOutcome {
    /// Successful delivery of `byte_size` bytes
    pub fn delivered(descriptor: &MediaDescriptor, byte_size: u64) -> Self {
        Self {
            ordinal: descriptor.ordinal,
            kind: descriptor.kind,
            success: true,
            failure: None,
            byte_size,
        }
    }

    /// Failed item
    pub fn failed(descriptor: &MediaDescriptor, reason: FailureReason, byte_size: u64) -> Self {
        Self {
            ordinal: descriptor.ordinal,
            kind: descriptor.kind,
            success: false,
            failure: Some(reason),
            byte_size,
        }
    }
}

/// Aggregate status of a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStatus {
    /// Every item was delivered
    AllSucceeded,
    /// Some but not all items were delivered
    Partial,
    /// Nothing was delivered
    Failed,
}

impl BatchStatus {
    /// Derive the status from per-item outcomes
    ///
    /// An empty outcome list is `Failed`.
    pub fn from_outcomes(outcomes: &[DownloadOutcome]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        match succeeded {
            0 => BatchStatus::Failed,
            n if n == outcomes.len() => BatchStatus::AllSucceeded,
            _ => BatchStatus::Partial,
        }
    }
}

/// Aggregated result of one `run()`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Overall status
    pub status: BatchStatus,
    /// One outcome per attempted item, in order
    pub outcomes: Vec<DownloadOutcome>,
    /// Message for the person who sent the URL
    pub summary: String,
    /// Machine-readable code when the batch failed before any item was attempted
    pub error_code: Option<String>,
}

impl BatchResult {
    /// Batch that aborted before media processing began
    pub fn aborted(error: &crate::error::Error) -> Self {
        Self {
            status: BatchStatus::Failed,
            outcomes: Vec::new(),
            summary: error.user_message(),
            error_code: Some(error.error_code().to_string()),
        }
    }

    /// Batch whose post resolved but held no downloadable media
    pub fn no_media() -> Self {
        Self {
            status: BatchStatus::Failed,
            outcomes: Vec::new(),
            summary: "No media found in this post.".to_string(),
            error_code: Some("no_media".to_string()),
        }
    }

    /// Batch built from per-item outcomes
    pub fn from_outcomes(outcomes: Vec<DownloadOutcome>, cancelled: bool) -> Self {
        let status = BatchStatus::from_outcomes(&outcomes);
        let summary = summarize(&outcomes, cancelled);
        Self {
            status,
            outcomes,
            summary,
            error_code: cancelled.then(|| "cancelled".to_string()),
        }
    }

    /// Number of delivered items
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

fn summarize(outcomes: &[DownloadOutcome], cancelled: bool) -> String {
    let total = outcomes.len();
    let succeeded = outcomes.iter().filter(|o| o.success).count();

    let mut summary = if total == 0 {
        "Nothing was sent.".to_string()
    } else if total == 1 && succeeded == 1 {
        "Done.".to_string()
    } else if succeeded == total {
        format!("Done: sent all {total} items.")
    } else {
        let failures: Vec<String> = outcomes
            .iter()
            .filter_map(|o| o.failure.as_ref().map(|f| format!("#{} {}", o.ordinal, f)))
            .collect();
        format!(
            "Sent {succeeded} of {total} items. Failed: {}.",
            failures.join(", ")
        )
    };
    if cancelled {
        summary.push_str(" Cancelled before finishing.");
    }
    summary
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(ordinal: usize, total: usize) -> MediaDescriptor {
        MediaDescriptor {
            kind: MediaKind::Photo,
            source_url: format!("https://cdn.example.com/{ordinal}.jpg"),
            ordinal,
            total,
        }
    }

    fn ok(ordinal: usize) -> DownloadOutcome {
        DownloadOutcome::delivered(&descriptor(ordinal, 2), 100)
    }

    fn fail(ordinal: usize) -> DownloadOutcome {
        DownloadOutcome::failed(&descriptor(ordinal, 2), FailureReason::Network, 0)
    }

    #[test]
    fn status_all_succeeded_when_every_item_delivered() {
        assert_eq!(
            BatchStatus::from_outcomes(&[ok(1), ok(2)]),
            BatchStatus::AllSucceeded
        );
    }

    #[test]
    fn status_partial_when_some_items_failed() {
        assert_eq!(
            BatchStatus::from_outcomes(&[ok(1), fail(2)]),
            BatchStatus::Partial
        );
    }

    #[test]
    fn status_failed_when_nothing_delivered() {
        assert_eq!(
            BatchStatus::from_outcomes(&[fail(1), fail(2)]),
            BatchStatus::Failed
        );
        assert_eq!(BatchStatus::from_outcomes(&[]), BatchStatus::Failed);
    }

    #[test]
    fn caption_is_ordinal_over_total() {
        assert_eq!(descriptor(2, 5).caption(), "2/5");
    }

    #[test]
    fn partial_summary_lists_failed_ordinals_with_reason() {
        let too_large = DownloadOutcome::failed(
            &descriptor(2, 2),
            FailureReason::TooLarge {
                size_bytes: 60 * 1024 * 1024,
            },
            0,
        );
        let result = BatchResult::from_outcomes(vec![ok(1), too_large], false);

        assert_eq!(result.status, BatchStatus::Partial);
        assert_eq!(
            result.summary,
            "Sent 1 of 2 items. Failed: #2 too-large (60.0 MB)."
        );
        assert_eq!(result.succeeded(), 1);
    }

    #[test]
    fn cancelled_batch_notes_cancellation() {
        let result = BatchResult::from_outcomes(vec![ok(1)], true);
        assert!(result.summary.ends_with("Cancelled before finishing."));
        assert_eq!(result.error_code.as_deref(), Some("cancelled"));
    }

    #[test]
    fn cancellation_before_first_item_sends_nothing() {
        let result = BatchResult::from_outcomes(Vec::new(), true);
        assert_eq!(result.status, BatchStatus::Failed);
        assert_eq!(result.summary, "Nothing was sent. Cancelled before finishing.");
    }

    #[test]
    fn aborted_batch_uses_taxonomy_message() {
        let error = crate::error::Error::NotFound("HTTP 404".into());
        let result = BatchResult::aborted(&error);

        assert_eq!(result.status, BatchStatus::Failed);
        assert!(result.outcomes.is_empty());
        assert_eq!(result.error_code.as_deref(), Some("not_found"));
        assert!(!result.summary.contains("HTTP 404"));
    }

    #[test]
    fn failure_reason_serializes_with_kebab_tag() {
        let json = serde_json::to_value(FailureReason::TooLarge { size_bytes: 7 }).unwrap();
        assert_eq!(json["reason"], "too-large");
        assert_eq!(json["size_bytes"], 7);
    }

    #[test]
    fn story_identifier_keeps_owner_hint() {
        let id = ContentIdentifier::story("someone", "3141592653");
        assert_eq!(id.kind(), ContentKind::Story);
        assert_eq!(id.code(), "3141592653");
        assert_eq!(id.owner_hint(), Some("someone"));
    }
}
