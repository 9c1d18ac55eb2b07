//! Shared helpers for unit and integration tests

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::store::{ContentId, RemoteMetadata, RemoteStore, SnapshotId, StoreError};

type ListingResult = Result<Vec<String>, StoreError>;

/// Store whose `list_directory` answers follow a script, repeating the last
/// entry once exhausted. The remaining operations fail loudly; tests using
/// them should run against `DirStore` instead.
#[derive(Default)]
pub(crate) struct ScriptedStore {
    listings: Mutex<VecDeque<ListingResult>>,
    last: Mutex<Option<ListingResult>>,
}

impl ScriptedStore {
    pub(crate) fn push_listing(self, result: ListingResult) -> Self {
        self.listings.lock().push_back(result);
        self
    }
}

#[async_trait]
impl RemoteStore for ScriptedStore {
    async fn list_directory(&self, _path: &str) -> Result<Vec<String>, StoreError> {
        if let Some(next) = self.listings.lock().pop_front() {
            *self.last.lock() = Some(next.clone());
            return next;
        }
        self.last
            .lock()
            .clone()
            .unwrap_or_else(|| Err(StoreError::Transient("listing script is empty".to_string())))
    }

    async fn get_metadata(&self, path: &str) -> Result<RemoteMetadata, StoreError> {
        Err(StoreError::Fatal(format!(
            "get_metadata('{path}') is not scripted"
        )))
    }

    async fn download(
        &self,
        content: &ContentId,
        _dest: &Path,
        _mtime: i64,
    ) -> Result<(), StoreError> {
        Err(StoreError::Fatal(format!(
            "download('{}') is not scripted",
            content.as_str()
        )))
    }

    async fn upload_tree(
        &self,
        local_root: &Path,
        _remote_path: &str,
    ) -> Result<SnapshotId, StoreError> {
        Err(StoreError::Fatal(format!(
            "upload_tree('{}') is not scripted",
            local_root.display()
        )))
    }
}
