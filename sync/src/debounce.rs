//! Quiescence-window debouncing of local change bursts
//!
//! Applications rarely write a file in one operation; editors and copies
//! arrive as bursts. The scheduler turns any burst into a single backup
//! trigger once the directory has been quiet for the configured window,
//! implemented as a cancellable delayed task: every incoming event re-arms
//! the window, and firing is held off while a sync is already in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::SyncGate;
use crate::service::SyncTrigger;
use crate::watcher::ChangeEvent;

/// Converts change-event bursts into debounced backup triggers.
pub struct DebounceScheduler {
    window: Duration,
    gate: Arc<SyncGate>,
}

impl DebounceScheduler {
    pub fn new(window: Duration, gate: Arc<SyncGate>) -> Self {
        Self { window, gate }
    }

    /// Spawn the scheduling task. It exits when `cancel` fires or the change
    /// channel closes; pending triggers are discarded on cancellation.
    pub fn spawn(
        self,
        mut changes: mpsc::Receiver<ChangeEvent>,
        triggers: mpsc::Sender<SyncTrigger>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            'armed: loop {
                // Wait for the first change of a burst.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = changes.recv() => match event {
                        Some(event) => trace!(path = %event.path.display(), "local change"),
                        None => break,
                    },
                }

                // Quiescence: every further change re-arms the window, and a
                // sync in flight defers firing by another window.
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break 'armed,
                        event = changes.recv() => match event {
                            Some(event) => {
                                trace!(path = %event.path.display(), "burst continues");
                            }
                            None => break 'armed,
                        },
                        _ = sleep(self.window) => {
                            if self.gate.is_idle() {
                                break;
                            }
                            debug!("sync in flight; deferring debounced backup");
                        }
                    }
                }

                debug!("directory quiescent; scheduling backup");
                if triggers.send(SyncTrigger::LocalChange).await.is_err() {
                    break;
                }
            }
            debug!("debounce scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::ChangeKind;
    use tokio::time::{timeout, Duration};

    const WINDOW: Duration = Duration::from_millis(50);

    fn event() -> ChangeEvent {
        ChangeEvent::new("/watched/a.txt", ChangeKind::Modified)
    }

    #[tokio::test]
    async fn burst_collapses_into_one_trigger() {
        let gate = SyncGate::new();
        let (changes_tx, changes_rx) = mpsc::channel(16);
        let (triggers_tx, mut triggers_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = DebounceScheduler::new(WINDOW, gate).spawn(
            changes_rx,
            triggers_tx,
            cancel.clone(),
        );

        for _ in 0..5 {
            changes_tx.send(event()).await.unwrap();
        }

        timeout(WINDOW * 10, triggers_rx.recv())
            .await
            .expect("trigger should fire after the quiescence window")
            .unwrap();

        // The burst produced exactly one trigger.
        assert!(timeout(WINDOW * 3, triggers_rx.recv()).await.is_err());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn new_events_rearm_the_window() {
        let gate = SyncGate::new();
        let (changes_tx, changes_rx) = mpsc::channel(16);
        let (triggers_tx, mut triggers_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = DebounceScheduler::new(WINDOW, gate).spawn(
            changes_rx,
            triggers_tx,
            cancel.clone(),
        );

        // Keep the directory noisy for several windows.
        for _ in 0..4 {
            changes_tx.send(event()).await.unwrap();
            tokio::time::sleep(WINDOW / 2).await;
            assert!(
                triggers_rx.try_recv().is_err(),
                "must not fire while changes keep arriving"
            );
        }

        timeout(WINDOW * 10, triggers_rx.recv())
            .await
            .expect("trigger should fire once the burst ends")
            .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn defers_while_sync_in_flight() {
        let gate = SyncGate::new();
        let (changes_tx, changes_rx) = mpsc::channel(16);
        let (triggers_tx, mut triggers_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = DebounceScheduler::new(WINDOW, gate.clone()).spawn(
            changes_rx,
            triggers_tx,
            cancel.clone(),
        );

        let permit = gate.try_begin().unwrap();
        changes_tx.send(event()).await.unwrap();
        assert!(
            timeout(WINDOW * 4, triggers_rx.recv()).await.is_err(),
            "must not fire while the gate is busy"
        );

        drop(permit);
        timeout(WINDOW * 10, triggers_rx.recv())
            .await
            .expect("deferred trigger should fire once the gate is idle")
            .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_discards_pending_trigger() {
        let gate = SyncGate::new();
        let (changes_tx, changes_rx) = mpsc::channel(16);
        let (triggers_tx, mut triggers_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = DebounceScheduler::new(WINDOW, gate).spawn(
            changes_rx,
            triggers_tx,
            cancel.clone(),
        );

        changes_tx.send(event()).await.unwrap();
        cancel.cancel();
        task.await.unwrap();
        assert!(triggers_rx.try_recv().is_err());
    }
}
