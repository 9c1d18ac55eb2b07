//! Local metadata scanning using walkdir and tokio::fs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::GlobSet;
use serde::{Deserialize, Serialize};
use tokio::fs;
use walkdir::WalkDir;

use crate::error::{Result, SyncError};

/// Metadata recorded for one local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// Modification time in whole Unix seconds; sub-second precision is
    /// deliberately dropped so comparisons happen at second granularity.
    pub mtime: i64,
    pub size: u64,
    pub is_dir: bool,
}

/// Snapshot of the local tree, keyed by root-relative path. Rebuilt fully on
/// each sync cycle; never persisted.
pub type LocalMetadata = BTreeMap<PathBuf, LocalEntry>;

/// Walks a local directory tree and produces its [`LocalMetadata`].
pub struct LocalScanner {
    follow_links: bool,
    exclude: GlobSet,
}

impl LocalScanner {
    /// Scanner excluding root-relative paths matched by `exclude` (the
    /// reserved versions subtree).
    pub fn new(follow_links: bool, exclude: GlobSet) -> Self {
        Self {
            follow_links,
            exclude,
        }
    }

    /// Scan `root` recursively. Deterministic given identical filesystem
    /// state; an unreadable root fails the cycle, not the engine.
    pub async fn scan(&self, root: &Path) -> Result<LocalMetadata> {
        if !root.is_dir() {
            return Err(SyncError::scan_error(root, "not a readable directory"));
        }

        let mut metadata = LocalMetadata::new();
        let walk = WalkDir::new(root)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(root, entry.path()));

        for entry in walk {
            let entry =
                entry.map_err(|e| SyncError::scan_error(root, format!("walk error: {e}")))?;
            if entry.depth() == 0 {
                continue;
            }

            let meta = fs::metadata(entry.path()).await.map_err(|e| {
                SyncError::scan_error(entry.path(), format!("failed to read metadata: {e}"))
            })?;

            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| SyncError::path_error(entry.path(), e.to_string()))?
                .to_path_buf();

            metadata.insert(
                relative,
                LocalEntry {
                    mtime: unix_seconds(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
                    size: meta.len(),
                    is_dir: meta.is_dir(),
                },
            );
        }

        Ok(metadata)
    }

    fn is_excluded(&self, root: &Path, path: &Path) -> bool {
        match path.strip_prefix(root) {
            Ok(relative) if !relative.as_os_str().is_empty() => self.exclude.is_match(relative),
            _ => false,
        }
    }
}

/// Truncate a timestamp to whole Unix seconds.
pub(crate) fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before_epoch) => -(before_epoch.duration().as_secs() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use tempfile::TempDir;
    use tokio::fs;

    fn scanner_for(config: &SyncConfig) -> LocalScanner {
        LocalScanner::new(config.follow_links, config.exclusion_matcher().unwrap())
    }

    #[tokio::test]
    async fn records_files_and_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::write(root.join("a.txt"), b"alpha").await.unwrap();
        fs::create_dir(root.join("docs")).await.unwrap();
        fs::write(root.join("docs").join("b.txt"), b"beta")
            .await
            .unwrap();

        let config = SyncConfig::new(root);
        let metadata = scanner_for(&config).scan(root).await.unwrap();

        let file = metadata.get(Path::new("a.txt")).unwrap();
        assert!(!file.is_dir);
        assert_eq!(file.size, 5);
        assert!(file.mtime > 0);

        assert!(metadata.get(Path::new("docs")).unwrap().is_dir);
        assert!(metadata.contains_key(Path::new("docs/b.txt")));
        assert!(!metadata.contains_key(Path::new("")));
    }

    #[tokio::test]
    async fn versions_subtree_is_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::write(root.join("a.txt"), b"alpha").await.unwrap();
        let versions = root.join(crate::config::DEFAULT_VERSIONS_DIR);
        fs::create_dir_all(versions.join("docs")).await.unwrap();
        fs::write(versions.join("docs").join("old.txt"), b"old")
            .await
            .unwrap();

        let config = SyncConfig::new(root);
        let metadata = scanner_for(&config).scan(root).await.unwrap();

        assert_eq!(metadata.len(), 1);
        assert!(metadata.contains_key(Path::new("a.txt")));
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config = SyncConfig::new(temp_dir.path());
        let result = scanner_for(&config)
            .scan(&temp_dir.path().join("absent"))
            .await;
        assert!(matches!(result, Err(SyncError::Scan { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn follows_symbolic_links() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir(root.join("real")).await.unwrap();
        fs::write(root.join("real").join("target.txt"), b"linked")
            .await
            .unwrap();
        tokio::fs::symlink(root.join("real"), root.join("alias"))
            .await
            .unwrap();

        let config = SyncConfig::new(root);
        let metadata = scanner_for(&config).scan(root).await.unwrap();

        assert!(metadata.contains_key(Path::new("alias/target.txt")));
    }

    #[test]
    fn unix_seconds_truncates() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(100_900);
        assert_eq!(unix_seconds(t), 100);
    }
}
