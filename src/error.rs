//! Error types for cloudsync

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for cloudsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for cloudsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("Cloud storage error: {0}")]
    Storage(String),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Process enumeration error: {0}")]
    Process(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Daemon error: {0}")]
    Daemon(String),
}

impl SyncError {
    /// Check if the failure is expected to clear up on a later pass
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_) | SyncError::Io(_) | SyncError::Watcher(_)
        )
    }
}
