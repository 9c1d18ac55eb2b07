//! Per-directory sync orchestration
//!
//! A [`SyncService`] wires one engine together with its debounce scheduler,
//! remote snapshot poller and local watcher, and serializes sync execution
//! through a single dispatcher task. Triggers arriving while a cycle is in
//! flight are deferred in the channel or dropped at the gate; they never run
//! concurrently with it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::debounce::DebounceScheduler;
use crate::engine::{SyncEngine, SyncOutcome};
use crate::error::{Result, SyncError};
use crate::poller::RemoteSnapshotPoller;
use crate::store::{SnapshotId, SnapshotRef, StoreError};
use crate::watcher::{ChangeEvent, LocalWatcher};

/// Reason to run a sync cycle.
#[derive(Debug, Clone)]
pub enum SyncTrigger {
    /// A debounced burst of local changes settled.
    LocalChange,
    /// The poller observed a snapshot the directory has not synchronized to.
    Reconcile(SnapshotId),
    /// No snapshots exist yet; upload unconditionally.
    InitBackup,
}

/// Running sync machinery for one directory.
pub struct SyncService {
    engine: Arc<SyncEngine>,
    watcher: Box<dyn LocalWatcher>,
    changes_tx: mpsc::Sender<ChangeEvent>,
    triggers_tx: mpsc::Sender<SyncTrigger>,
    debounce_cancel: CancellationToken,
    debounce_task: JoinHandle<()>,
    poll_cancel: CancellationToken,
    poll_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
    suspended: Arc<AtomicBool>,
}

impl SyncService {
    /// Run the initial sync, spawn the background tasks and start the
    /// watcher.
    ///
    /// The initial sync reconciles against the live remote tree; an empty
    /// store downgrades it to the first-time backup, and a transient remote
    /// failure is deferred to the poller rather than failing startup.
    pub async fn start(
        engine: Arc<SyncEngine>,
        mut watcher: Box<dyn LocalWatcher>,
    ) -> Result<Self> {
        match engine.sync(SnapshotRef::Latest, false).await {
            Ok(_) => {}
            Err(SyncError::Store(StoreError::NotFound(_))) => {
                info!("no remote state yet; performing first backup");
                engine.sync(SnapshotRef::Latest, true).await?;
            }
            Err(SyncError::Store(ref store_err)) if store_err.is_transient() => {
                warn!(error = %store_err, "initial sync failed; the poller will retry");
            }
            Err(e) => return Err(e),
        }

        let (changes_tx, changes_rx) = mpsc::channel(1024);
        let (triggers_tx, triggers_rx) = mpsc::channel(64);
        let suspended = Arc::new(AtomicBool::new(false));

        let debounce_cancel = CancellationToken::new();
        let debounce_task =
            DebounceScheduler::new(engine.config().quiescence_window, engine.gate().clone())
                .spawn(changes_rx, triggers_tx.clone(), debounce_cancel.clone());

        let poll_cancel = CancellationToken::new();
        let poll_task = RemoteSnapshotPoller::new(engine.config().poll_interval, engine.clone())
            .spawn(triggers_tx.clone(), suspended.clone(), poll_cancel.clone());

        let dispatch_task = tokio::spawn(dispatch(
            engine.clone(),
            triggers_rx,
            suspended.clone(),
        ));

        watcher.start(&engine.config().local_dir, changes_tx.clone())?;
        info!(dir = %engine.config().local_dir.display(), "sync service started");

        Ok(Self {
            engine,
            watcher,
            changes_tx,
            triggers_tx,
            debounce_cancel,
            debounce_task,
            poll_cancel,
            poll_task,
            dispatch_task,
            suspended,
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Sender feeding the debounce scheduler; watchers push change events
    /// here.
    pub fn change_sender(&self) -> mpsc::Sender<ChangeEvent> {
        self.changes_tx.clone()
    }

    /// True once a fatal remote failure suspended sync for this directory.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Stop all background work: the debounce scheduler first, then the
    /// poller, then the watcher, and finally await the dispatcher, which
    /// finishes any in-flight sync before exiting. Nothing outlives the
    /// call.
    pub async fn stop(mut self) {
        self.debounce_cancel.cancel();
        let _ = self.debounce_task.await;

        self.poll_cancel.cancel();
        let _ = self.poll_task.await;

        self.watcher.stop();

        drop(self.triggers_tx);
        let _ = self.dispatch_task.await;
        info!(dir = %self.engine.config().local_dir.display(), "sync service stopped");
    }
}

async fn dispatch(
    engine: Arc<SyncEngine>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
    suspended: Arc<AtomicBool>,
) {
    while let Some(trigger) = triggers.recv().await {
        if suspended.load(Ordering::Acquire) {
            debug!(?trigger, "sync suspended; ignoring trigger");
            continue;
        }

        let result = match trigger {
            SyncTrigger::InitBackup => engine.sync(SnapshotRef::Latest, true).await,
            SyncTrigger::Reconcile(id) => engine.sync(SnapshotRef::Archived(id), false).await,
            SyncTrigger::LocalChange => backup_after_quiescence(&engine).await,
        };

        match result {
            Ok(SyncOutcome::Busy) => debug!("trigger dropped; sync already in flight"),
            Ok(SyncOutcome::Completed(_)) => {}
            Err(SyncError::Store(store_err @ StoreError::Fatal(_))) => {
                error!(error = %store_err, "fatal remote failure; suspending sync");
                suspended.store(true, Ordering::Release);
            }
            // Failed cycles leave both trees as they were; the next trigger
            // retries.
            Err(e) => error!(error = %e, "sync cycle failed"),
        }
    }
    debug!("sync dispatcher stopped");
}

/// Debounced-backup path: when the remote moved ahead during the quiescence
/// window, reconcile against the newer snapshot (which uploads the local
/// changes at the end); otherwise the local tree is authoritative and is
/// uploaded outright.
async fn backup_after_quiescence(engine: &Arc<SyncEngine>) -> Result<SyncOutcome> {
    match engine.latest_snapshot().await {
        Ok(latest) => {
            if engine.local_snapshot().as_ref() == Some(&latest) {
                engine.sync(SnapshotRef::Latest, true).await
            } else {
                engine.sync(SnapshotRef::Archived(latest), false).await
            }
        }
        Err(StoreError::NotFound(_)) => engine.sync(SnapshotRef::Latest, true).await,
        Err(e) => Err(e.into()),
    }
}
