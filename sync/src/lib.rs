//! Snapshot Sync Engine Library
//!
//! Keeps a local directory tree consistent with a versioned remote snapshot
//! store by reconciling local file metadata against a remote snapshot's
//! metadata listing:
//! - Local change events are debounced into a single backup trigger once the
//!   directory has been quiescent
//! - A poller periodically checks the archive namespace for snapshots the
//!   directory has not seen
//! - The engine diffs the two metadata views and, per file, downloads,
//!   uploads, archives a versioned copy, or leaves it alone
//! - Sync cycles for one directory are serialized through an atomic gate
//!
//! The remote gateway and the OS file-watching backend stay behind the
//! [`RemoteStore`] and [`LocalWatcher`] capabilities.

pub mod archiver;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod fs_store;
pub mod poller;
pub mod scanner;
pub mod service;
pub mod store;
pub mod watcher;

// Re-export main types and functions
pub use archiver::VersionArchiver;
pub use config::{SyncConfig, DEFAULT_VERSIONS_DIR};
pub use debounce::DebounceScheduler;
pub use engine::{SyncEngine, SyncGate, SyncOutcome, SyncPermit, SyncReport};
pub use error::{Result, SyncError};
pub use fs_store::DirStore;
pub use poller::RemoteSnapshotPoller;
pub use scanner::{LocalEntry, LocalMetadata, LocalScanner};
pub use service::{SyncService, SyncTrigger};
pub use store::{
    ContentId, RemoteEntry, RemoteMetadata, RemoteStore, SnapshotId, SnapshotRef, StoreError,
    ARCHIVE_NAMESPACE, LATEST_ALIAS,
};
pub use watcher::{ChangeEvent, ChangeKind, LocalWatcher, NullWatcher};

use std::sync::Arc;

/// Run a single comparison sync of `config.local_dir` against the live
/// remote tree.
pub async fn sync_once(config: SyncConfig, store: Arc<dyn RemoteStore>) -> Result<SyncOutcome> {
    let engine = SyncEngine::new(config, store)?;
    engine.sync(SnapshotRef::Latest, false).await
}

#[cfg(test)]
pub(crate) mod testutil;
