//! Timestamped pre-overwrite backups

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::{Result, SyncError};
use crate::types::TIMESTAMP_FORMAT;

/// A write-once copy of one file, taken just before a sync action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    /// The timestamped snapshot directory
    pub dir: PathBuf,
    /// The copied file inside `dir`
    pub file: PathBuf,
}

/// Creates snapshot directories under a backup root. Never prunes.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `path` into a brand-new `<root>/<timestamp>/` directory
    pub async fn create_backup(&self, path: &Path) -> Result<BackupSnapshot> {
        let file_name = path
            .file_name()
            .ok_or_else(|| SyncError::Backup(format!("no file name in {}", path.display())))?;

        let dir = self.create_snapshot_dir().await?;
        let file = dir.join(file_name);
        tokio::fs::copy(path, &file).await.map_err(|e| {
            SyncError::Backup(format!(
                "failed to copy {} to {}: {}",
                path.display(),
                file.display(),
                e
            ))
        })?;

        tracing::info!("Created backup: {}", file.display());
        Ok(BackupSnapshot { dir, file })
    }

    async fn create_snapshot_dir(&self) -> Result<PathBuf> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(SyncError::Backup(format!(
                    "backup path exists but is not a directory: {}",
                    self.root.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.root).await?;
                tracing::info!("Created folder: {}", self.root.display());
            }
            Err(e) => return Err(e.into()),
        }

        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut candidate = self.root.join(&stamp);
        let mut attempt = 1;
        loop {
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                // Same microsecond as a previous snapshot; never share a directory
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    candidate = self.root.join(format!("{}-{}", stamp, attempt));
                    attempt += 1;
                }
                Err(e) => {
                    return Err(SyncError::Backup(format!(
                        "failed to create timestamped backup directory {}: {}",
                        candidate.display(),
                        e
                    )))
                }
            }
        }
    }
}
