//! URL classification
//!
//! Turns a user-supplied link into a [`ContentIdentifier`]. Classification is pure:
//! no network access, and the same input always yields the same answer.

use crate::types::{ContentIdentifier, ContentKind};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;
use url::Url;

/// Hosts that serve post pages
const ACCEPTED_HOSTS: &[&str] = &["instagram.com", "www.instagram.com", "m.instagram.com"];

/// Path patterns tried in order; the first match wins
const PATH_PATTERNS: &[(ContentKind, &str)] = &[
    (
        ContentKind::Post,
        r"^/(?:[A-Za-z0-9._]+/)?p/(?P<code>[A-Za-z0-9_-]+)/?$",
    ),
    (
        ContentKind::Reel,
        r"^/(?:[A-Za-z0-9._]+/)?reels?/(?P<code>[A-Za-z0-9_-]+)/?$",
    ),
    (ContentKind::Tv, r"^/tv/(?P<code>[A-Za-z0-9_-]+)/?$"),
    (
        ContentKind::Story,
        r"^/stories/(?P<user>[A-Za-z0-9._]+)/(?P<code>[0-9]+)/?$",
    ),
];

static PATTERNS: LazyLock<Vec<(ContentKind, Regex)>> = LazyLock::new(compile_patterns);

fn compile_patterns() -> Vec<(ContentKind, Regex)> {
    PATH_PATTERNS
        .iter()
        .filter_map(|(kind, pattern)| {
            regex::RegexBuilder::new(pattern)
                .size_limit(1024 * 1024)
                .build()
                .map_err(|e| {
                    warn!("Invalid {:?} URL pattern '{}': {}", kind, pattern, e);
                })
                .ok()
                .map(|re| (*kind, re))
        })
        .collect()
}

/// Classify a URL, returning `None` when it is not a supported post, reel, video or story link
///
/// Query strings and fragments are ignored. Bare domains, profile pages and
/// foreign hosts are not recognized.
pub fn classify(input: &str) -> Option<ContentIdentifier> {
    let url = Url::parse(input.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    if !ACCEPTED_HOSTS.contains(&host.as_str()) {
        return None;
    }

    let path = url.path();
    PATTERNS.iter().find_map(|(kind, re)| {
        let caps = re.captures(path)?;
        let code = caps.name("code")?.as_str();
        match kind {
            ContentKind::Story => {
                let user = caps.name("user")?.as_str();
                Some(ContentIdentifier::story(user, code))
            }
            other => Some(ContentIdentifier::shortcode(*other, code)),
        }
    })
}
