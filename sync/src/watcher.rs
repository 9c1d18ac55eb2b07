//! Local change watching abstraction
//!
//! The engine consumes change notifications through the [`LocalWatcher`]
//! trait and never names a concrete backend; the daemon provides the
//! platform implementation. Implementations must ignore paths under the
//! reserved versions subtree.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::error::Result;

/// Kind of filesystem change under the watched root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// One change notification for a path under the watched root.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Capability delivering change events for a local tree.
pub trait LocalWatcher: Send {
    /// Begin watching `root`, delivering events on `events` until [`stop`]
    /// is called.
    ///
    /// [`stop`]: LocalWatcher::stop
    fn start(&mut self, root: &Path, events: mpsc::Sender<ChangeEvent>) -> Result<()>;

    /// Stop delivering events. Idempotent.
    fn stop(&mut self);
}

/// Watcher that never emits events, for setups relying on remote polling
/// only (and for driving services with hand-fed events in tests).
#[derive(Debug, Default)]
pub struct NullWatcher;

impl LocalWatcher for NullWatcher {
    fn start(&mut self, _root: &Path, _events: mpsc::Sender<ChangeEvent>) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}
