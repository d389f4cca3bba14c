//! Media enumeration
//!
//! Expands a resolved post into the ordered list of items to download. Two node
//! shapes are understood:
//!
//! - web GraphQL: `is_video`, `video_url`, `display_url`
//! - private API v1: `media_type` (1 photo, 2 video), `video_versions[0].url`,
//!   `image_versions2.candidates[0].url`
//!
//! Parsing fails closed: if any node lacks a usable URL the whole post yields no
//! items.

use crate::types::{MediaDescriptor, MediaKind, PostMetadata};
use serde_json::Value;
use tracing::warn;

/// Expand a post into media descriptors with contiguous ordinals starting at 1
pub fn enumerate(post: &PostMetadata) -> Vec<MediaDescriptor> {
    let parsed: Option<Vec<(MediaKind, String)>> = post.nodes.iter().map(parse_node).collect();

    let Some(items) = parsed else {
        warn!(
            shortcode = %post.identifier,
            nodes = post.nodes.len(),
            "Post metadata has a media node without a usable URL"
        );
        return Vec::new();
    };

    let total = items.len();
    items
        .into_iter()
        .enumerate()
        .map(|(i, (kind, source_url))| MediaDescriptor {
            kind,
            source_url,
            ordinal: i + 1,
            total,
        })
        .collect()
}

fn parse_node(node: &Value) -> Option<(MediaKind, String)> {
    if let Some(is_video) = node.get("is_video").and_then(Value::as_bool) {
        return if is_video {
            url_at(node, "/video_url").map(|u| (MediaKind::Video, u))
        } else {
            url_at(node, "/display_url").map(|u| (MediaKind::Photo, u))
        };
    }

    match node.get("media_type").and_then(Value::as_u64)? {
        1 => url_at(node, "/image_versions2/candidates/0/url").map(|u| (MediaKind::Photo, u)),
        2 => url_at(node, "/video_versions/0/url").map(|u| (MediaKind::Video, u)),
        _ => None,
    }
}

fn url_at(node: &Value, pointer: &str) -> Option<String> {
    node.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .map(str::to_string)
}
