//! Reconciliation and conflict resolution

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use filetime::FileTime;

use super::{decide, SyncOutcome};
use crate::backup::{BackupManager, BackupSnapshot};
use crate::error::{Result, SyncError};
use crate::filter::FileFilter;
use crate::storage::Storage;
use crate::types::{PassReport, SyncConfig, SyncDecision};

/// Owns the upload/download decisions for one watch root and one bucket
pub struct Syncer {
    storage: Arc<dyn Storage>,
    watch_path: PathBuf,
    filter: FileFilter,
    backups: BackupManager,
    tolerance: chrono::Duration,
}

impl Syncer {
    pub fn new(
        storage: Arc<dyn Storage>,
        watch_path: impl Into<PathBuf>,
        filter: FileFilter,
        backups: BackupManager,
        tolerance: Duration,
    ) -> Result<Self> {
        let tolerance = chrono::Duration::from_std(tolerance)
            .map_err(|e| SyncError::Config(format!("tolerance out of range: {}", e)))?;
        Ok(Self {
            storage,
            watch_path: watch_path.into(),
            filter,
            backups,
            tolerance,
        })
    }

    pub fn from_config(config: &SyncConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        Self::new(
            storage,
            &config.watch_path,
            FileFilter::new(&config.save_suffix, &config.excluded_file),
            BackupManager::new(&config.backup_dir),
            config.tolerance(),
        )
    }

    pub fn watch_path(&self) -> &Path {
        &self.watch_path
    }

    pub fn filter(&self) -> &FileFilter {
        &self.filter
    }

    /// Make sure the bucket exists, then run one full reconciliation pass
    pub async fn initial_sync(&self) -> Result<PassReport> {
        tracing::info!("Starting initial sync...");
        self.storage.ensure_bucket().await?;
        let report = self.full_sync().await;
        tracing::info!("Initial sync complete");
        Ok(report)
    }

    /// Upload newer local files, then download newer remote ones.
    ///
    /// Individual failures are logged and counted, never fatal to the pass.
    pub async fn full_sync(&self) -> PassReport {
        let mut report = PassReport::begin();
        self.upload_newer_local(&mut report).await;
        self.download_newer_remote(&mut report).await;
        let report = report.finish();

        if report.transferred() > 0 || report.failed > 0 {
            tracing::info!(
                "Sync pass: {} uploaded, {} downloaded, {} unchanged, {} failed",
                report.uploaded,
                report.downloaded,
                report.unchanged,
                report.failed
            );
        } else {
            tracing::debug!("Sync pass: {} files unchanged", report.unchanged);
        }
        report
    }

    /// Run [`Syncer::sync_file`] over every local candidate
    pub async fn upload_newer_local(&self, report: &mut PassReport) {
        let paths = match self.local_candidates().await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::error!(
                    "Failed to read watch directory {}: {}",
                    self.watch_path.display(),
                    e
                );
                report.failed += 1;
                return;
            }
        };

        for path in paths {
            match self.sync_file(&path).await {
                Ok(outcome) => report.record(outcome.decision),
                Err(e) => {
                    tracing::error!("Failed to sync file {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }
    }

    /// Download remote candidates that are missing locally or newer beyond tolerance.
    ///
    /// Never uploads; the local side of the pass already covered that.
    pub async fn download_newer_remote(&self, report: &mut PassReport) {
        let records = match self.storage.list().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Failed to list cloud files: {}", e);
                report.failed += 1;
                return;
            }
        };

        for record in records {
            let Some(name) = Path::new(&record.name)
                .file_name()
                .and_then(|n| n.to_str())
            else {
                continue;
            };
            if !self.filter.is_candidate_name(name) {
                continue;
            }

            let local_path = self.watch_path.join(name);
            let should_download = match tokio::fs::metadata(&local_path).await {
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::info!("Downloading new file from cloud: {}", record.name);
                    true
                }
                Err(e) => {
                    tracing::error!("Failed to stat local file {}: {}", local_path.display(), e);
                    report.failed += 1;
                    continue;
                }
                Ok(meta) if meta.is_dir() => {
                    tracing::warn!(
                        "Skipping {}: a directory has the same name",
                        local_path.display()
                    );
                    continue;
                }
                Ok(meta) => match meta.modified() {
                    Ok(modified) => {
                        let local_time = DateTime::<Utc>::from(modified);
                        let newer = record.mod_time - local_time > self.tolerance;
                        if newer {
                            tracing::info!("Cloud file {} is newer, downloading...", record.name);
                        }
                        newer
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to read modification time of {}: {}",
                            local_path.display(),
                            e
                        );
                        report.failed += 1;
                        continue;
                    }
                },
            };

            if !should_download {
                continue;
            }

            match self
                .download_and_replace(&record.name, &local_path, record.mod_time)
                .await
            {
                Ok(outcome) => report.record(outcome.decision),
                Err(e) => {
                    tracing::error!("Failed to download {}: {}", record.name, e);
                    report.failed += 1;
                }
            }
        }
    }

    /// Bring one local file and its remote counterpart in line
    pub async fn sync_file(&self, path: &Path) -> Result<SyncOutcome> {
        let meta = tokio::fs::metadata(path).await?;
        if meta.is_dir() {
            return Err(SyncError::NotAFile(path.to_path_buf()));
        }
        let object_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::NotAFile(path.to_path_buf()))?;

        let local_time = DateTime::<Utc>::from(meta.modified()?);
        let remote = self.storage.stat(object_name).await?;
        let decision = decide(local_time, remote.as_ref().map(|r| r.mod_time), self.tolerance);

        match (decision, remote) {
            (SyncDecision::Upload, None) => {
                tracing::info!("File {} not found in cloud, uploading...", object_name);
                self.backup_and_upload(path, object_name).await
            }
            (SyncDecision::Upload, Some(remote)) => {
                tracing::info!(
                    "Local file {} is newer (cloud: {}, local: {}), uploading...",
                    object_name,
                    remote.mod_time,
                    local_time
                );
                self.backup_and_upload(path, object_name).await
            }
            (SyncDecision::Download, Some(remote)) => {
                tracing::info!(
                    "Cloud file {} is newer (cloud: {}, local: {}), downloading...",
                    object_name,
                    remote.mod_time,
                    local_time
                );
                self.download_and_replace(object_name, path, remote.mod_time)
                    .await
            }
            _ => Ok(SyncOutcome::unchanged()),
        }
    }

    async fn backup_and_upload(&self, path: &Path, object_name: &str) -> Result<SyncOutcome> {
        let backup = self.backup_if_present(path).await?;

        let bytes = self.storage.upload(path, object_name).await?;
        tracing::info!("Uploaded {} to bucket {}", object_name, self.storage.bucket());

        Ok(SyncOutcome {
            decision: SyncDecision::Upload,
            backup,
            bytes,
        })
    }

    /// Stage the object next to the target, then rename it into place
    async fn download_and_replace(
        &self,
        object_name: &str,
        local_path: &Path,
        remote_time: DateTime<Utc>,
    ) -> Result<SyncOutcome> {
        let backup = self.backup_if_present(local_path).await?;

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::NotAFile(local_path.to_path_buf()))?;
        let staging_dir = local_path.parent().unwrap_or(&self.watch_path);

        // Removed on drop, so a failed transfer leaves nothing behind
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".download")
            .tempfile_in(staging_dir)?
            .into_temp_path();

        let bytes = self.storage.download(object_name, &staging).await?;

        // The staging file is private to us; take over the mode of the save it replaces
        match tokio::fs::metadata(local_path).await {
            Ok(meta) => tokio::fs::set_permissions(&staging, meta.permissions()).await?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        staging.persist(local_path).map_err(|e| SyncError::Io(e.error))?;

        let stamp = FileTime::from_unix_time(remote_time.timestamp(), remote_time.timestamp_subsec_nanos());
        if let Err(e) = filetime::set_file_times(local_path, stamp, stamp) {
            tracing::warn!(
                "Warning: failed to set mod time on {}: {}",
                local_path.display(),
                e
            );
        }

        tracing::info!("Downloaded and replaced {}", local_path.display());
        Ok(SyncOutcome {
            decision: SyncDecision::Download,
            backup,
            bytes,
        })
    }

    async fn backup_if_present(&self, path: &Path) -> Result<Option<BackupSnapshot>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(self.backups.create_backup(path).await?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn local_candidates(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.watch_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            if self.filter.is_sync_candidate(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}
