//! Filesystem-backed snapshot store
//!
//! [`DirStore`] keeps immutable snapshots as plain directory trees under
//! `<root>/<namespace>/Archives/<id>/`, with a `Latest.json` pointer file
//! naming the most recent one; the `Latest` alias resolves through it.
//! Identifiers are timestamp-derived and lexicographically sortable, so the
//! greatest identifier is always the newest snapshot. It stands in for a
//! network gateway wherever a mounted or local path can act as the remote.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use crate::scanner::unix_seconds;
use crate::store::{
    ContentId, RemoteEntry, RemoteMetadata, RemoteStore, SnapshotId, StoreError, ARCHIVE_NAMESPACE,
    LATEST_ALIAS,
};

const LATEST_POINTER: &str = "Latest.json";

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    snapshot: SnapshotId,
}

/// Snapshot store rooted at a local directory.
pub struct DirStore {
    root: PathBuf,
    exclude: GlobSet,
    seq: AtomicU64,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: GlobSet::empty(),
            seq: AtomicU64::new(0),
        }
    }

    /// Exclude local paths matching `exclude` from uploads (the reserved
    /// versions subtree; without this, retained copies would round-trip back
    /// out of the next snapshot).
    pub fn with_exclude(mut self, exclude: GlobSet) -> Self {
        self.exclude = exclude;
        self
    }

    /// Resolve a remote path to a directory on disk, following the `Latest`
    /// alias through the pointer file.
    async fn resolve(&self, remote_path: &str) -> Result<PathBuf, StoreError> {
        let trimmed = remote_path.trim_matches('/');
        let (namespace, last) = match trimmed.rsplit_once('/') {
            Some((namespace, last)) => (namespace, last),
            None => ("", trimmed),
        };

        if last == LATEST_ALIAS {
            let base = self.root.join(namespace);
            let pointer = self.read_pointer(&base).await?;
            Ok(base.join(ARCHIVE_NAMESPACE).join(pointer.as_str()))
        } else {
            Ok(self.root.join(trimmed))
        }
    }

    async fn read_pointer(&self, base: &Path) -> Result<SnapshotId, StoreError> {
        let path = base.join(LATEST_POINTER);
        let raw = fs::read(&path)
            .await
            .map_err(|e| StoreError::from_io(&path, e))?;
        let pointer: LatestPointer = serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Transient(format!("corrupt pointer file: {e}")))?;
        Ok(pointer.snapshot)
    }

    async fn write_pointer(&self, base: &Path, snapshot: &SnapshotId) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(&LatestPointer {
            snapshot: snapshot.clone(),
        })
        .map_err(|e| StoreError::Transient(e.to_string()))?;
        let path = base.join(LATEST_POINTER);
        fs::write(&path, raw)
            .await
            .map_err(|e| upload_error(&path, e))
    }

    /// Next unused timestamp-derived identifier. The sequence suffix keeps
    /// same-second uploads distinct and sortable.
    fn next_snapshot_id(&self, archives: &Path) -> SnapshotId {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S");
        loop {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("{stamp}-{seq:04}");
            if !archives.join(&candidate).exists() {
                return SnapshotId::new(candidate);
            }
        }
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        match path.strip_prefix(root) {
            Ok(relative) if !relative.as_os_str().is_empty() => self.exclude.is_match(relative),
            _ => false,
        }
    }
}

#[async_trait]
impl RemoteStore for DirStore {
    async fn list_directory(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.resolve(path).await?;
        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::from_io(&dir, e))?;

        let mut names = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(&dir, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn get_metadata(&self, path: &str) -> Result<RemoteMetadata, StoreError> {
        let base = self.resolve(path).await?;
        if !base.is_dir() {
            return Err(StoreError::NotFound(path.to_string()));
        }

        let mut metadata = RemoteMetadata::new();
        for entry in WalkDir::new(&base) {
            let entry = entry.map_err(|e| {
                StoreError::Transient(format!("walk error under '{}': {e}", base.display()))
            })?;
            if entry.depth() == 0 {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&base)
                .map_err(|e| StoreError::Transient(e.to_string()))?
                .to_path_buf();
            let meta = entry
                .metadata()
                .map_err(|e| StoreError::Transient(e.to_string()))?;

            let remote_entry = if meta.is_dir() {
                RemoteEntry::Directory
            } else {
                RemoteEntry::File {
                    mtime: unix_seconds(meta.modified().unwrap_or(std::time::UNIX_EPOCH)),
                    size: meta.len(),
                    content: ContentId::new(entry.path().to_string_lossy().into_owned()),
                }
            };
            metadata.insert(relative, remote_entry);
        }
        Ok(metadata)
    }

    async fn download(
        &self,
        content: &ContentId,
        dest: &Path,
        mtime: i64,
    ) -> Result<(), StoreError> {
        let source = Path::new(content.as_str());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::from_io(parent, e))?;
        }
        fs::copy(source, dest)
            .await
            .map_err(|e| StoreError::from_io(source, e))?;
        utime::set_file_times(dest, mtime, mtime).map_err(|e| StoreError::from_io(dest, e))
    }

    async fn upload_tree(
        &self,
        local_root: &Path,
        remote_path: &str,
    ) -> Result<SnapshotId, StoreError> {
        let base = self.root.join(remote_path.trim_matches('/'));
        let archives = base.join(ARCHIVE_NAMESPACE);
        fs::create_dir_all(&archives)
            .await
            .map_err(|e| upload_error(&archives, e))?;

        let id = self.next_snapshot_id(&archives);
        let dest_root = archives.join(id.as_str());
        fs::create_dir_all(&dest_root)
            .await
            .map_err(|e| upload_error(&dest_root, e))?;

        let walk = WalkDir::new(local_root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(local_root, entry.path()));

        for entry in walk {
            let entry = entry.map_err(|e| {
                StoreError::Transient(format!("walk error under '{}': {e}", local_root.display()))
            })?;
            if entry.depth() == 0 {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(local_root)
                .map_err(|e| StoreError::Transient(e.to_string()))?;
            let dest = dest_root.join(relative);
            let meta = entry
                .metadata()
                .map_err(|e| StoreError::Transient(e.to_string()))?;

            if meta.is_dir() {
                fs::create_dir_all(&dest)
                    .await
                    .map_err(|e| upload_error(&dest, e))?;
            } else {
                fs::copy(entry.path(), &dest)
                    .await
                    .map_err(|e| upload_error(&dest, e))?;
                let mtime = unix_seconds(meta.modified().unwrap_or(std::time::UNIX_EPOCH));
                utime::set_file_times(&dest, mtime, mtime).map_err(|e| upload_error(&dest, e))?;
            }
        }

        self.write_pointer(&base, &id).await?;
        debug!(snapshot = %id, "stored snapshot");
        Ok(id)
    }
}

/// Upload-side IO failures are never `NotFound`: a vanished local file must
/// not masquerade as a missing archive namespace.
fn upload_error(path: &Path, err: std::io::Error) -> StoreError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            StoreError::Fatal(format!("access denied at '{}': {err}", path.display()))
        }
        _ => StoreError::Transient(format!("upload failed at '{}': {err}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seed_local(root: &Path) {
        fs::create_dir_all(root.join("docs")).await.unwrap();
        fs::write(root.join("a.txt"), b"alpha").await.unwrap();
        fs::write(root.join("docs").join("b.txt"), b"beta")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn listing_missing_namespace_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirStore::new(temp_dir.path());
        let err = store.list_directory(ARCHIVE_NAMESPACE).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn upload_then_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("local");
        let remote = temp_dir.path().join("remote");
        seed_local(&local).await;

        let store = DirStore::new(&remote);
        let id = store.upload_tree(&local, "").await.unwrap();

        let names = store.list_directory(ARCHIVE_NAMESPACE).await.unwrap();
        assert_eq!(names, vec![id.to_string()]);

        let metadata = store
            .get_metadata(&format!("{ARCHIVE_NAMESPACE}/{id}"))
            .await
            .unwrap();
        assert!(metadata.get(Path::new("docs")).unwrap().is_dir());
        let RemoteEntry::File { size, .. } = metadata.get(Path::new("a.txt")).unwrap() else {
            panic!("a.txt should be a file entry");
        };
        assert_eq!(*size, 5);

        // Latest resolves through the pointer to the same tree.
        let latest = store.get_metadata(LATEST_ALIAS).await.unwrap();
        assert_eq!(latest.len(), metadata.len());
    }

    #[tokio::test]
    async fn snapshot_ids_grow_lexicographically() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("local");
        seed_local(&local).await;

        let store = DirStore::new(temp_dir.path().join("remote"));
        let first = store.upload_tree(&local, "").await.unwrap();
        let second = store.upload_tree(&local, "").await.unwrap();
        assert!(second > first);

        let latest = store.get_metadata(LATEST_ALIAS).await.unwrap();
        assert!(latest.contains_key(Path::new("a.txt")));
    }

    #[tokio::test]
    async fn download_sets_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("local");
        seed_local(&local).await;

        let store = DirStore::new(temp_dir.path().join("remote"));
        let id = store.upload_tree(&local, "").await.unwrap();
        let metadata = store
            .get_metadata(&format!("{ARCHIVE_NAMESPACE}/{id}"))
            .await
            .unwrap();
        let RemoteEntry::File { content, .. } = metadata.get(Path::new("a.txt")).unwrap() else {
            panic!("a.txt should be a file entry");
        };

        let dest = temp_dir.path().join("fetched").join("a.txt");
        store.download(content, &dest, 1234).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"alpha");
        let meta = fs::metadata(&dest).await.unwrap();
        assert_eq!(unix_seconds(meta.modified().unwrap()), 1234);
    }

    #[tokio::test]
    async fn excluded_subtree_stays_out_of_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let local = temp_dir.path().join("local");
        seed_local(&local).await;
        fs::create_dir_all(local.join(".snapsync-versions"))
            .await
            .unwrap();
        fs::write(local.join(".snapsync-versions").join("old.txt"), b"old")
            .await
            .unwrap();

        let exclude = crate::config::SyncConfig::new(&local)
            .exclusion_matcher()
            .unwrap();
        let store = DirStore::new(temp_dir.path().join("remote")).with_exclude(exclude);
        let id = store.upload_tree(&local, "").await.unwrap();

        let metadata = store
            .get_metadata(&format!("{ARCHIVE_NAMESPACE}/{id}"))
            .await
            .unwrap();
        assert!(!metadata
            .keys()
            .any(|p| p.starts_with(".snapsync-versions")));
    }
}
