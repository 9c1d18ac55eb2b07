use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, warn};

use snapsync::{ChangeEvent, ChangeKind, LocalWatcher, SyncError};

/// OS-native change watcher backed by `notify`'s recommended backend
/// (inotify/FSEvents/ReadDirectoryChangesW, with its polling fallback).
/// Events under the reserved versions subtree are filtered out before they
/// reach the debounce scheduler.
pub struct NotifyWatcher {
    versions_root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl NotifyWatcher {
    pub fn new(versions_root: PathBuf) -> Self {
        Self {
            versions_root,
            watcher: None,
        }
    }
}

impl LocalWatcher for NotifyWatcher {
    fn start(
        &mut self,
        root: &Path,
        events: mpsc::Sender<ChangeEvent>,
    ) -> snapsync::Result<()> {
        let versions_root = self.versions_root.clone();

        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        error!("file watcher error: {e}");
                        return;
                    }
                };

                let kind = match event.kind {
                    EventKind::Create(_) => ChangeKind::Created,
                    EventKind::Modify(_) => ChangeKind::Modified,
                    EventKind::Remove(_) => ChangeKind::Removed,
                    _ => return,
                };

                for path in event.paths {
                    if path.starts_with(&versions_root) {
                        continue;
                    }
                    // The debounce scheduler only needs to learn that the
                    // directory is dirty; dropping an event from a full
                    // channel loses nothing but a log line.
                    if let Err(e) = events.try_send(ChangeEvent::new(path, kind)) {
                        warn!("dropping change event: {e}");
                    }
                }
            })
            .map_err(|e| SyncError::Watcher(e.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| SyncError::Watcher(e.to_string()))?;
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the notify watcher stops its backend threads.
        self.watcher = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn delivers_events_and_filters_versions_subtree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().to_path_buf();
        let versions_root = root.join(".snapsync-versions");
        std::fs::create_dir(&versions_root).unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let mut watcher = NotifyWatcher::new(versions_root.clone());
        watcher.start(&root, tx).unwrap();

        std::fs::write(versions_root.join("old.txt"), b"ignored").unwrap();
        std::fs::write(root.join("a.txt"), b"alpha").unwrap();

        let event = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("an event should arrive for the new file")
            .unwrap();
        assert!(!event.path.starts_with(&versions_root));

        watcher.stop();
    }
}
