//! Per-directory sync configuration

use std::path::PathBuf;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Default name of the reserved subtree holding versioned copies.
pub const DEFAULT_VERSIONS_DIR: &str = ".snapsync-versions";

/// Configuration of one synced directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local directory kept in sync.
    pub local_dir: PathBuf,

    /// Remote namespace this directory syncs against (path prefix inside the
    /// store; empty when the store root is dedicated to the directory).
    #[serde(default)]
    pub remote_root: String,

    /// Minimum duration with no further local changes before a debounced
    /// backup fires.
    #[serde(default = "default_quiescence_window", with = "humantime_serde")]
    pub quiescence_window: Duration,

    /// Period between checks for new remote snapshots.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Upper bound on remote listing, metadata and download calls; expiry is
    /// treated as a transient failure.
    #[serde(default = "default_remote_timeout", with = "humantime_serde")]
    pub remote_timeout: Duration,

    /// Name of the reserved versions subtree, excluded from scans, watching
    /// and uploads.
    #[serde(default = "default_versions_dir")]
    pub versions_dir: String,

    /// Follow symbolic links while scanning.
    #[serde(default = "default_follow_links")]
    pub follow_links: bool,
}

fn default_quiescence_window() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_remote_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_versions_dir() -> String {
    DEFAULT_VERSIONS_DIR.to_string()
}

fn default_follow_links() -> bool {
    true
}

impl SyncConfig {
    /// Configuration for `local_dir` with all defaults.
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.into(),
            remote_root: String::new(),
            quiescence_window: default_quiescence_window(),
            poll_interval: default_poll_interval(),
            remote_timeout: default_remote_timeout(),
            versions_dir: default_versions_dir(),
            follow_links: default_follow_links(),
        }
    }

    /// Matcher for root-relative paths under the reserved versions subtree.
    pub fn exclusion_matcher(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in [
            self.versions_dir.clone(),
            format!("{}/**", self.versions_dir),
        ] {
            builder.add(Glob::new(&pattern).map_err(|e| SyncError::Pattern(e.to_string()))?);
        }
        builder
            .build()
            .map_err(|e| SyncError::Pattern(e.to_string()))
    }

    /// Absolute path of the reserved versions subtree.
    pub fn versions_root(&self) -> PathBuf {
        self.local_dir.join(&self.versions_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if self.versions_dir.is_empty() || self.versions_dir.contains('/') {
            return Err(SyncError::Pattern(format!(
                "versions_dir must be a single directory name, got '{}'",
                self.versions_dir
            )));
        }
        if self.quiescence_window.is_zero() || self.poll_interval.is_zero() {
            return Err(SyncError::Pattern(
                "quiescence_window and poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
