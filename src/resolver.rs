//! Post metadata resolution
//!
//! [`PostResolver::resolve`] fetches the raw document for one identifier through the
//! [`MetadataProvider`], retrying throttled and transient failures and swapping in a
//! fresh session when upstream rejects the current one. The document is then
//! reduced to a [`PostMetadata`] and run through the privacy gate.

use crate::config::RetryPolicy;
use crate::error::{Error, Result, UpstreamError};
use crate::provider::MetadataProvider;
use crate::retry::{Attempt, RetryError, with_retry};
use crate::session::{Session, SessionManager};
use crate::types::{ContentIdentifier, Owner, PostMetadata};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a raw document keeps the media object, in lookup order
const MEDIA_ROOTS: &[&str] = &[
    "/data/xdt_shortcode_media",
    "/data/shortcode_media",
    "/graphql/shortcode_media",
    "/items/0",
];

/// What an identifier resolved to
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// The post is visible to the session
    Post(PostMetadata),
    /// The owner is private and the session does not follow them
    PrivateAccount {
        /// Owner username
        username: String,
        /// Public profile URL of the owner
        profile_url: String,
    },
    /// Upstream has no such post
    NotFound,
}

/// Resolves identifiers into post metadata
pub struct PostResolver {
    provider: Arc<dyn MetadataProvider>,
    sessions: Arc<SessionManager>,
    policy: RetryPolicy,
}

impl PostResolver {
    /// Create a resolver sharing `sessions` with other batches
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        sessions: Arc<SessionManager>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            sessions,
            policy,
        }
    }

    /// Resolve one identifier
    ///
    /// Auth-class failures replace the session and retry; rate-limit and connection
    /// failures back off and retry; not-found returns immediately. Every path is
    /// bounded by the resolver's retry policy.
    pub async fn resolve(
        &self,
        id: &ContentIdentifier,
        session: Arc<Session>,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let current = Mutex::new(session);
        let current = &current;
        let max_attempts = self.policy.max_attempts.max(1);

        let fetched = with_retry(&self.policy, cancel, move |attempt| async move {
            let session = Arc::clone(&*current.lock().await);
            debug!(shortcode = %id, attempt, generation = session.generation(), "Resolving post");

            match self.provider.fetch_post(id, &session).await {
                Ok(doc) => Attempt::Done(Some(doc)),
                Err(UpstreamError::NotFound { .. }) => Attempt::Done(None),
                // A replacement session on the last attempt would never be used
                Err(e @ UpstreamError::Unauthorized { .. }) if attempt >= max_attempts => {
                    Attempt::Retry(e)
                }
                Err(e @ UpstreamError::Unauthorized { .. }) => {
                    warn!(shortcode = %id, attempt, error = %e, "Session rejected, reauthenticating");
                    let fresh = self.sessions.invalidate_and_reauthenticate(&session).await;
                    *current.lock().await = fresh;
                    Attempt::Retry(e)
                }
                Err(e) => Attempt::from(Err(e)),
            }
        })
        .await;

        let doc = match fetched {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                info!(shortcode = %id, "Post not found");
                return Ok(Resolution::NotFound);
            }
            Err(RetryError::Cancelled) => return Err(Error::Cancelled),
            Err(RetryError::Terminal(e) | RetryError::Exhausted { last: e, .. }) => {
                return Err(e.into());
            }
        };

        let Some(post) = parse_post(id, &doc)? else {
            info!(shortcode = %id, "Upstream document has no media, treating as not found");
            return Ok(Resolution::NotFound);
        };

        if post.owner.is_private && !post.owner.viewer_follows {
            info!(shortcode = %id, owner = %post.owner.username, "Post belongs to a private account");
            return Ok(Resolution::PrivateAccount {
                profile_url: post.owner.profile_url(),
                username: post.owner.username,
            });
        }

        Ok(Resolution::Post(post))
    }
}

/// Reduce a raw upstream document to [`PostMetadata`]
///
/// Returns `Ok(None)` when the document has no media root, and an
/// [`Error::UnknownFailure`] when the media root has no usable owner.
pub fn parse_post(id: &ContentIdentifier, doc: &Value) -> Result<Option<PostMetadata>> {
    let Some(media) = MEDIA_ROOTS
        .iter()
        .find_map(|ptr| doc.pointer(ptr))
        .filter(|m| m.is_object())
    else {
        return Ok(None);
    };

    let owner = parse_owner(media, id)
        .ok_or_else(|| Error::UnknownFailure(format!("post {id} has no owner section")))?;

    let (is_carousel, nodes) = if let Some(edges) = media
        .pointer("/edge_sidecar_to_children/edges")
        .and_then(Value::as_array)
    {
        let nodes = edges
            .iter()
            .map(|edge| edge.get("node").cloned().unwrap_or(Value::Null))
            .collect();
        (true, nodes)
    } else if let Some(children) = media.get("carousel_media").and_then(Value::as_array) {
        (true, children.clone())
    } else {
        (false, vec![media.clone()])
    };

    Ok(Some(PostMetadata {
        identifier: id.clone(),
        is_carousel,
        owner,
        nodes,
    }))
}

fn parse_owner(media: &Value, id: &ContentIdentifier) -> Option<Owner> {
    let section = media.get("owner").or_else(|| media.get("user"))?;
    let username = section
        .get("username")
        .and_then(Value::as_str)
        .or(id.owner_hint())?
        .to_string();

    let is_private = section
        .get("is_private")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let viewer_follows = section
        .get("followed_by_viewer")
        .and_then(Value::as_bool)
        .or_else(|| {
            section
                .pointer("/friendship_status/following")
                .and_then(Value::as_bool)
        })
        .unwrap_or(false);

    Some(Owner {
        username,
        is_private,
        viewer_follows,
    })
}
