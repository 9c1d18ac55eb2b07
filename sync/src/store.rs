//! Remote snapshot store abstraction
//!
//! The engine never talks to a concrete backend; it consumes the
//! [`RemoteStore`] capability. Snapshots are immutable trees stored under the
//! archive namespace, named by lexicographically sortable identifiers, with
//! `Latest` as a well-known alias for the live (non-archived) tree.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Name of the namespace holding historical snapshots.
pub const ARCHIVE_NAMESPACE: &str = "Archives";

/// Well-known alias the store resolves to the live tree.
pub const LATEST_ALIAS: &str = "Latest";

/// Errors surfaced by a [`RemoteStore`] implementation, tagged by kind so the
/// engine can branch on them: only `NotFound` triggers the first-time backup,
/// `Transient` failures are retried, `Fatal` failures suspend the directory.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("remote path not found: {0}")]
    NotFound(String),

    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("fatal remote failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Classify an IO error from a store backend.
    pub fn from_io(path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let path = path.as_ref().display();
        match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                StoreError::Fatal(format!("access denied at '{path}': {err}"))
            }
            _ => StoreError::Transient(format!("'{path}': {err}")),
        }
    }
}

/// Identifier of one immutable snapshot. Ordering is lexicographic over the
/// underlying string; the greatest identifier names the most recent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to file content within the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Target of a comparison sync: a specific archived snapshot or the live tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRef {
    Latest,
    Archived(SnapshotId),
}

impl SnapshotRef {
    /// Remote path of the referenced tree under `remote_root`.
    pub fn remote_path(&self, remote_root: &str) -> String {
        match self {
            SnapshotRef::Latest => remote_join(remote_root, LATEST_ALIAS),
            SnapshotRef::Archived(id) => {
                remote_join(remote_root, &format!("{ARCHIVE_NAMESPACE}/{id}"))
            }
        }
    }
}

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotRef::Latest => f.write_str(LATEST_ALIAS),
            SnapshotRef::Archived(id) => write!(f, "{ARCHIVE_NAMESPACE}/{id}"),
        }
    }
}

/// One entry of a remote metadata listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteEntry {
    File {
        /// Modification time in whole Unix seconds.
        mtime: i64,
        size: u64,
        content: ContentId,
    },
    Directory,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self, RemoteEntry::Directory)
    }
}

/// Recursive metadata listing for one snapshot or the live tree, keyed by
/// root-relative path. Immutable once fetched.
pub type RemoteMetadata = BTreeMap<PathBuf, RemoteEntry>;

/// Capability consumed by the sync engine; implemented by storage gateways.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List the child names of a remote directory. Fails with
    /// [`StoreError::NotFound`] if the path or namespace does not exist.
    async fn list_directory(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Recursive metadata listing for a snapshot or the live tree.
    async fn get_metadata(&self, path: &str) -> Result<RemoteMetadata, StoreError>;

    /// Fetch content, write it to `dest` and set the file's mtime.
    async fn download(&self, content: &ContentId, dest: &Path, mtime: i64)
        -> Result<(), StoreError>;

    /// Upload the full local tree as a new immutable snapshot under
    /// `remote_path` and return its identifier.
    async fn upload_tree(&self, local_root: &Path, remote_path: &str)
        -> Result<SnapshotId, StoreError>;
}

/// Join two remote path segments, tolerating an empty base.
pub fn remote_join(base: &str, rest: &str) -> String {
    if base.is_empty() {
        rest.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), rest)
    }
}

/// Bound a remote call with a timeout; expiry is reported as a transient
/// failure so callers retry it like any other availability problem.
pub async fn bounded<T, F>(limit: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Transient(format!(
            "remote call exceeded {}s timeout",
            limit.as_secs()
        ))),
    }
}
