//! Core reconciliation engine
//!
//! One [`SyncEngine`] owns one synced directory. A cycle either uploads the
//! whole local tree as a new snapshot (`skip_comparison`), or diffs local
//! metadata against one remote snapshot's metadata and acts per file:
//! download what the remote has newer (archiving the displaced local copy),
//! leave newer local files alone, and finish with one full upload when
//! anything local-only or locally-newer was seen. Cycles for the same
//! directory never overlap: the [`SyncGate`] hands out at most one permit.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::archiver::VersionArchiver;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::scanner::LocalScanner;
use crate::store::{
    bounded, remote_join, ContentId, RemoteEntry, RemoteStore, SnapshotId, SnapshotRef, StoreError,
    ARCHIVE_NAMESPACE,
};

/// Per-directory `Idle | Syncing` state, checked-and-set atomically.
///
/// Holding the returned [`SyncPermit`] marks the directory busy; dropping it
/// marks it idle again. All triggers (debounce tick, poller, manual calls)
/// go through the same gate, so reconciliation never runs concurrently with
/// itself for one directory.
#[derive(Debug, Default)]
pub struct SyncGate {
    syncing: AtomicBool,
}

impl SyncGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attempt the `Idle -> Syncing` transition.
    pub fn try_begin(self: &Arc<Self>) -> Option<SyncPermit> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncPermit {
                gate: Arc::clone(self),
            })
    }

    pub fn is_idle(&self) -> bool {
        !self.syncing.load(Ordering::Acquire)
    }
}

/// RAII marker for an in-flight sync.
#[derive(Debug)]
pub struct SyncPermit {
    gate: Arc<SyncGate>,
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        self.gate.syncing.store(false, Ordering::Release);
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub downloaded: u32,
    pub archived: u32,
    pub dirs_created: u32,
    /// Identifier of the snapshot created by this cycle, if any.
    pub uploaded: Option<SnapshotId>,
    /// Snapshot pointer recorded at the end of the cycle.
    pub snapshot: Option<SnapshotId>,
}

/// Result of a sync invocation.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Another cycle was in flight; this trigger was dropped.
    Busy,
    Completed(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Busy => None,
            SyncOutcome::Completed(report) => Some(report),
        }
    }
}

/// Reconciliation engine for one synced directory.
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn RemoteStore>,
    scanner: LocalScanner,
    archiver: VersionArchiver,
    gate: Arc<SyncGate>,
    local_snapshot: parking_lot::Mutex<Option<SnapshotId>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, store: Arc<dyn RemoteStore>) -> Result<Self> {
        config.validate()?;
        let exclude = config.exclusion_matcher()?;
        let scanner = LocalScanner::new(config.follow_links, exclude);
        let archiver = VersionArchiver::new(&config.local_dir, &config.versions_dir);
        Ok(Self {
            config,
            store,
            scanner,
            archiver,
            gate: SyncGate::new(),
            local_snapshot: parking_lot::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<SyncGate> {
        &self.gate
    }

    /// Identifier of the snapshot this directory was last synchronized to.
    pub fn local_snapshot(&self) -> Option<SnapshotId> {
        self.local_snapshot.lock().clone()
    }

    pub(crate) fn record_snapshot(&self, id: &SnapshotId) {
        *self.local_snapshot.lock() = Some(id.clone());
    }

    /// Greatest identifier under the archive namespace.
    pub async fn latest_snapshot(&self) -> std::result::Result<SnapshotId, StoreError> {
        let path = remote_join(&self.config.remote_root, ARCHIVE_NAMESPACE);
        let names = bounded(
            self.config.remote_timeout,
            self.store.list_directory(&path),
        )
        .await?;
        names
            .into_iter()
            .max()
            .map(SnapshotId::new)
            .ok_or(StoreError::NotFound(path))
    }

    /// Run one sync cycle against `target`.
    ///
    /// With `skip_comparison` the local tree is uploaded unconditionally
    /// (first-time initialization and the debounced-local-change path).
    /// Returns [`SyncOutcome::Busy`] without touching anything when a cycle
    /// for this directory is already in flight.
    pub async fn sync(&self, target: SnapshotRef, skip_comparison: bool) -> Result<SyncOutcome> {
        let Some(_permit) = self.gate.try_begin() else {
            debug!(
                dir = %self.config.local_dir.display(),
                "sync already in flight; dropping trigger"
            );
            return Ok(SyncOutcome::Busy);
        };

        let span = info_span!(
            "sync",
            cycle = %Uuid::new_v4(),
            dir = %self.config.local_dir.display(),
            target = %target,
            skip_comparison,
        );
        let report = self.run_cycle(target, skip_comparison).instrument(span).await?;
        Ok(SyncOutcome::Completed(report))
    }

    async fn run_cycle(&self, target: SnapshotRef, skip_comparison: bool) -> Result<SyncReport> {
        info!("starting sync");
        let mut report = SyncReport::default();

        if skip_comparison {
            let id = self.upload_full_tree().await?;
            report.uploaded = Some(id.clone());
            report.snapshot = Some(id.clone());
            self.record_snapshot(&id);
            info!(snapshot = %id, "synchronized");
            return Ok(report);
        }

        let remote_path = target.remote_path(&self.config.remote_root);
        let remote = bounded(
            self.config.remote_timeout,
            self.store.get_metadata(&remote_path),
        )
        .await?;
        let local = self.scanner.scan(&self.config.local_dir).await?;

        let mut backup_owed = false;

        for (relative, entry) in &remote {
            if !entry.is_dir() {
                continue;
            }
            let dir = self.config.local_dir.join(relative);
            if !dir.is_dir() {
                info!(path = %dir.display(), "creating directory");
                fs::create_dir_all(&dir).await.map_err(|e| {
                    SyncError::path_error(&dir, format!("failed to create directory: {e}"))
                })?;
                report.dirs_created += 1;
            }
        }

        for (relative, entry) in &remote {
            let RemoteEntry::File { mtime, content, .. } = entry else {
                continue;
            };
            let local_path = self.config.local_dir.join(relative);
            match local.get(relative.as_path()) {
                Some(ours) if ours.is_dir => {
                    warn!(
                        path = %local_path.display(),
                        "remote file clashes with local directory; leaving local tree untouched"
                    );
                }
                Some(ours) => {
                    if *mtime > ours.mtime {
                        // Remote is authoritative; retain the displaced copy
                        // tagged with its own mtime before overwriting.
                        self.archiver.versioned_copy(relative, ours.mtime).await?;
                        report.archived += 1;
                        self.download(content, &local_path, *mtime).await?;
                        report.downloaded += 1;
                    } else if *mtime < ours.mtime {
                        debug!(path = %relative.display(), "local copy is newer; backup owed");
                        backup_owed = true;
                    } else {
                        trace!(path = %relative.display(), "up to date");
                    }
                }
                None => {
                    self.download(content, &local_path, *mtime).await?;
                    report.downloaded += 1;
                }
            }
        }

        // A path present locally and absent from the snapshot is re-uploaded
        // whether it is new here or was deleted remotely; without tombstones
        // the two are indistinguishable.
        for relative in local.keys() {
            if !remote.contains_key(relative) {
                debug!(path = %relative.display(), "not present in snapshot; backup owed");
                backup_owed = true;
            }
        }

        if backup_owed {
            let id = self.upload_full_tree().await?;
            report.uploaded = Some(id.clone());
            report.snapshot = Some(id);
        } else {
            report.snapshot = match &target {
                SnapshotRef::Archived(id) => Some(id.clone()),
                SnapshotRef::Latest => match self.latest_snapshot().await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(error = %e, "could not refresh snapshot pointer");
                        self.local_snapshot()
                    }
                },
            };
        }

        if let Some(id) = &report.snapshot {
            self.record_snapshot(id);
        }
        info!(
            downloaded = report.downloaded,
            archived = report.archived,
            dirs_created = report.dirs_created,
            uploaded = report.uploaded.as_ref().map(|id| id.as_str()),
            "sync complete"
        );
        Ok(report)
    }

    async fn download(&self, content: &ContentId, dest: &Path, mtime: i64) -> Result<()> {
        info!(path = %dest.display(), "downloading");
        bounded(
            self.config.remote_timeout,
            self.store.download(content, dest, mtime),
        )
        .await?;
        Ok(())
    }

    async fn upload_full_tree(&self) -> Result<SnapshotId> {
        info!("uploading local tree as new snapshot");
        let id = self
            .store
            .upload_tree(&self.config.local_dir, &self.config.remote_root)
            .await?;
        Ok(id)
    }
}
