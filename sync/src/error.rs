//! Error types for the sync engine library

use std::path::PathBuf;

use crate::store::StoreError;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Comprehensive error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Directory scanning errors
    #[error("Directory scan error at '{path}': {message}")]
    Scan { path: PathBuf, message: String },

    /// Versioned/conflicted copy errors
    #[error("Archive error at '{path}': {message}")]
    Archive { path: PathBuf, message: String },

    /// Exclusion pattern errors
    #[error("Exclusion pattern error: {0}")]
    Pattern(String),

    /// Remote store errors, tagged by kind
    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    /// Local change watcher errors
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SyncError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new directory scan error
    pub fn scan_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Scan {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new archive error
    pub fn archive_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.into(),
        }
    }
}
