//! Versioned and conflicted copies of files about to diverge
//!
//! Copies are retention artifacts, never sync inputs: versioned copies land
//! under the reserved versions subtree (excluded from scans), conflicted
//! copies beside the original. Both splice a fixed-width, sortable UTC
//! timestamp tag before the file extension and preserve the source mtime.

use std::path::{Path, PathBuf};

use chrono::DateTime;
use tokio::fs;
use tracing::info;

use crate::error::{Result, SyncError};

/// Produces versioned and conflicted copies for one synced directory.
pub struct VersionArchiver {
    local_dir: PathBuf,
    versions_dir: PathBuf,
}

impl VersionArchiver {
    pub fn new(local_dir: impl Into<PathBuf>, versions_dir_name: &str) -> Self {
        let local_dir = local_dir.into();
        let versions_dir = local_dir.join(versions_dir_name);
        Self {
            local_dir,
            versions_dir,
        }
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    /// Copy `relpath` into the versions subtree under a name tagged with
    /// `mtime`, creating missing parent directories. Returns the copy's path.
    pub async fn versioned_copy(&self, relpath: &Path, mtime: i64) -> Result<PathBuf> {
        let tag = timestamp_tag(mtime)?;
        let source = self.local_dir.join(relpath);
        let dest = self.versions_dir.join(tagged_name(relpath, &tag));

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                SyncError::archive_error(parent, format!("failed to create directory: {e}"))
            })?;
        }

        info!(path = %dest.display(), "creating versioned copy");
        copy_with_mtime(&source, &dest, mtime).await?;
        Ok(dest)
    }

    /// Copy `path` beside itself under a conflict-tagged name.
    pub async fn conflicted_copy(&self, path: &Path, mtime: i64) -> Result<PathBuf> {
        let tag = format!("conflicted copy {}", timestamp_tag(mtime)?);
        let dest = path
            .parent()
            .unwrap_or(&self.local_dir)
            .join(tagged_name(Path::new(path.file_name().unwrap_or_default()), &tag));

        info!(path = %dest.display(), "creating conflicted copy");
        copy_with_mtime(path, &dest, mtime).await?;
        Ok(dest)
    }
}

/// Fixed-width sortable tag for a truncated Unix timestamp.
pub(crate) fn timestamp_tag(mtime: i64) -> Result<String> {
    let time = DateTime::from_timestamp(mtime, 0)
        .ok_or_else(|| SyncError::archive_error("", format!("unrepresentable mtime {mtime}")))?;
    Ok(time.format("%Y-%m-%d %H-%M-%S").to_string())
}

/// Splice `.(tag)` before the file extension: `a.txt` -> `a.(tag).txt`,
/// `Makefile` -> `Makefile.(tag)`.
pub(crate) fn tagged_name(relpath: &Path, tag: &str) -> PathBuf {
    let stem = relpath
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match relpath.extension() {
        Some(ext) => format!("{stem}.({tag}).{}", ext.to_string_lossy()),
        None => format!("{stem}.({tag})"),
    };
    match relpath.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

/// Content copy that carries the source's modification time over.
async fn copy_with_mtime(source: &Path, dest: &Path, mtime: i64) -> Result<()> {
    fs::copy(source, dest)
        .await
        .map_err(|e| SyncError::archive_error(dest, format!("failed to copy: {e}")))?;
    utime::set_file_times(dest, mtime, mtime)
        .map_err(|e| SyncError::archive_error(dest, format!("failed to set file times: {e}")))
}
