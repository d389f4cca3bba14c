//! Session cache file
//!
//! A single JSON document holding the last authenticated session. Writes go to a
//! sibling temp file that is then renamed over the cache, so a crash mid-write never
//! leaves a truncated cache behind.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// On-disk form of an authenticated session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSession {
    /// Cookie header value
    pub cookies: String,
    /// User agent the session was created with
    pub user_agent: String,
    /// Account the session belongs to
    pub username: String,
    /// When the login happened
    pub acquired_at: DateTime<Utc>,
}

/// Reads and writes the session cache file
#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached session
    ///
    /// A missing file yields `None`. An unreadable or corrupt file is logged and also
    /// yields `None`; the next successful login overwrites it.
    pub async fn load(&self) -> Option<CachedSession> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read session cache");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt session cache");
                None
            }
        }
    }

    /// Persist a session atomically
    pub async fn save(&self, session: &CachedSession) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(session)?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), "Session cache written");
        Ok(())
    }

    /// Remove the cache file if it exists
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
