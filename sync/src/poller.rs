//! Periodic polling for new remote snapshots
//!
//! On each tick the poller resolves the greatest snapshot identifier under
//! the archive namespace and compares it to the directory's local pointer.
//! Error kinds matter here: only `NotFound` means "no snapshots yet" and
//! schedules the first-time backup; transient failures are retried with
//! exponential backoff and otherwise skipped until the next tick; a fatal
//! failure suspends sync for the directory and stops the poller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::SyncEngine;
use crate::service::SyncTrigger;
use crate::store::StoreError;

/// Watches the archive namespace for snapshots this directory has not seen.
pub struct RemoteSnapshotPoller {
    interval: Duration,
    engine: Arc<SyncEngine>,
}

enum PollOutcome {
    Continue,
    Stop,
}

impl RemoteSnapshotPoller {
    pub fn new(interval: Duration, engine: Arc<SyncEngine>) -> Self {
        Self { interval, engine }
    }

    /// Spawn the polling task. It exits when `cancel` fires, the trigger
    /// channel closes, or a fatal remote failure suspends the directory.
    pub fn spawn(
        self,
        triggers: mpsc::Sender<SyncTrigger>,
        suspended: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // the service already ran the initial sync

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.check(&triggers, &suspended).await {
                    PollOutcome::Continue => {}
                    PollOutcome::Stop => break,
                }
            }
            debug!("remote snapshot poller stopped");
        })
    }

    async fn check(
        &self,
        triggers: &mpsc::Sender<SyncTrigger>,
        suspended: &AtomicBool,
    ) -> PollOutcome {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(Some(self.interval / 2))
            .build();

        let result = backoff::future::retry(policy, || async {
            self.engine.latest_snapshot().await.map_err(|e| {
                if e.is_transient() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await;

        match result {
            Ok(latest) => {
                if self.engine.local_snapshot().as_ref() != Some(&latest)
                    && self.engine.gate().is_idle()
                {
                    debug!(snapshot = %latest, "new remote snapshot available");
                    if triggers.send(SyncTrigger::Reconcile(latest)).await.is_err() {
                        return PollOutcome::Stop;
                    }
                }
                PollOutcome::Continue
            }
            Err(StoreError::NotFound(path)) => {
                info!(path, "archive namespace is empty; scheduling initial backup");
                if triggers.send(SyncTrigger::InitBackup).await.is_err() {
                    return PollOutcome::Stop;
                }
                PollOutcome::Continue
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "remote poll failed; will retry next cycle");
                PollOutcome::Continue
            }
            Err(e) => {
                error!(error = %e, "fatal remote failure; suspending sync for this directory");
                suspended.store(true, Ordering::Release);
                PollOutcome::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::store::SnapshotId;
    use crate::testutil::ScriptedStore;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const POLL: Duration = Duration::from_millis(30);

    fn engine_with(store: ScriptedStore, dir: &TempDir) -> Arc<SyncEngine> {
        let mut config = SyncConfig::new(dir.path());
        config.poll_interval = POLL;
        Arc::new(SyncEngine::new(config, Arc::new(store)).unwrap())
    }

    fn spawn_poller(
        engine: Arc<SyncEngine>,
    ) -> (
        mpsc::Receiver<SyncTrigger>,
        Arc<AtomicBool>,
        CancellationToken,
        JoinHandle<()>,
    ) {
        let (triggers_tx, triggers_rx) = mpsc::channel(16);
        let suspended = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let task = RemoteSnapshotPoller::new(POLL, engine).spawn(
            triggers_tx,
            suspended.clone(),
            cancel.clone(),
        );
        (triggers_rx, suspended, cancel, task)
    }

    #[tokio::test]
    async fn missing_namespace_schedules_initial_backup() {
        let dir = TempDir::new().unwrap();
        let store = ScriptedStore::default()
            .push_listing(Err(StoreError::NotFound("Archives".to_string())));
        let engine = engine_with(store, &dir);

        let (mut triggers_rx, suspended, cancel, task) = spawn_poller(engine);
        let trigger = timeout(POLL * 20, triggers_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(trigger, SyncTrigger::InitBackup));
        assert!(!suspended.load(Ordering::Acquire));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unseen_snapshot_schedules_reconciliation() {
        let dir = TempDir::new().unwrap();
        let store = ScriptedStore::default()
            .push_listing(Ok(vec!["s1".to_string(), "s2".to_string()]));
        let engine = engine_with(store, &dir);

        let (mut triggers_rx, _suspended, cancel, task) = spawn_poller(engine);
        let trigger = timeout(POLL * 20, triggers_rx.recv()).await.unwrap().unwrap();
        match trigger {
            SyncTrigger::Reconcile(id) => assert_eq!(id, SnapshotId::new("s2")),
            other => panic!("expected reconcile trigger, got {other:?}"),
        }

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn known_snapshot_triggers_nothing() {
        let dir = TempDir::new().unwrap();
        let store = ScriptedStore::default().push_listing(Ok(vec!["s1".to_string()]));
        let engine = engine_with(store, &dir);
        // The directory already synchronized to s1.
        engine.record_snapshot(&SnapshotId::new("s1"));

        let (mut triggers_rx, _suspended, cancel, task) = spawn_poller(engine);
        assert!(
            timeout(POLL * 6, triggers_rx.recv()).await.is_err(),
            "a snapshot matching the local pointer must not trigger a sync"
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_skips_cycle() {
        let dir = TempDir::new().unwrap();
        let store = ScriptedStore::default()
            .push_listing(Err(StoreError::Transient("connection reset".to_string())))
            .push_listing(Err(StoreError::Transient("connection reset".to_string())))
            .push_listing(Ok(vec!["s1".to_string()]));
        let engine = engine_with(store, &dir);

        let (mut triggers_rx, suspended, cancel, task) = spawn_poller(engine);
        // The transient failures are retried/skipped; the next successful
        // listing produces the trigger.
        let trigger = timeout(Duration::from_secs(5), triggers_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(trigger, SyncTrigger::Reconcile(_)));
        assert!(!suspended.load(Ordering::Acquire));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn fatal_failure_suspends_and_stops() {
        let dir = TempDir::new().unwrap();
        let store = ScriptedStore::default()
            .push_listing(Err(StoreError::Fatal("access denied".to_string())));
        let engine = engine_with(store, &dir);

        let (mut triggers_rx, suspended, _cancel, task) = spawn_poller(engine);
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(suspended.load(Ordering::Acquire));
        assert!(triggers_rx.try_recv().is_err());
    }
}
