//! Core types for cloudsync

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Suffix shared by every save file the game writes
pub const DEFAULT_SAVE_SUFFIX: &str = ".sav";

/// Settings file that lives next to the saves but is machine-specific
pub const DEFAULT_EXCLUDED_FILE: &str = "EnhancedInputUserSettings.sav";

/// Executable of the game whose writes we must not race
pub const DEFAULT_PROCESS_NAME: &str = "RSDragonwilds-Win64-Shipping.exe";

/// Bucket used when none is given
pub const DEFAULT_BUCKET: &str = "gamesync-dragonwilds";

/// MinIO default listen address
pub const DEFAULT_ENDPOINT: &str = "localhost:9000";

/// Region sent to S3-compatible stores that ignore it
pub const DEFAULT_REGION: &str = "us-east-1";

/// Timestamp layout used for backup folder names and the `ModtimeString` metadata
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.6f";

/// Metadata of a local file or a remote object at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Basename, which doubles as the object key
    pub name: String,
    /// Modification time, always UTC
    pub mod_time: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, mod_time: DateTime<Utc>, size: u64) -> Self {
        Self {
            name: name.into(),
            mod_time,
            size,
        }
    }
}

/// What a single-file comparison resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDecision {
    /// Local copy wins (or the remote copy is missing)
    Upload,
    /// Remote copy is newer beyond the tolerance window
    Download,
    /// Both copies are within the tolerance window
    NoOp,
}

/// Result of a full reconciliation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PassReport {
    pub fn begin() -> Self {
        Self {
            uploaded: 0,
            downloaded: 0,
            unchanged: 0,
            failed: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record(&mut self, decision: SyncDecision) {
        match decision {
            SyncDecision::Upload => self.uploaded += 1,
            SyncDecision::Download => self.downloaded += 1,
            SyncDecision::NoOp => self.unchanged += 1,
        }
    }

    pub fn finish(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }

    /// Number of files that were actually transferred
    pub fn transferred(&self) -> usize {
        self.uploaded + self.downloaded
    }
}

/// Connection details for the S3-compatible store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Host and port, optionally with an `http://` or `https://` scheme
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Derived from the endpoint scheme
    #[serde(default)]
    pub use_ssl: bool,
}

impl S3Config {
    pub fn new(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        let use_ssl = endpoint.starts_with("https://");
        Self {
            endpoint,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
            region: default_region(),
            use_ssl,
        }
    }

    /// Full endpoint URL, with a scheme picked from `use_ssl` when none was given
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.clone()
        } else if self.use_ssl {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Everything the sync engine needs, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory holding the save files (subdirectories are not synced)
    pub watch_path: PathBuf,
    /// Substring of the game executable; `None` disables the guard
    pub process_name: Option<String>,
    /// Root for timestamped backup snapshots
    pub backup_dir: PathBuf,
    pub s3: S3Config,
    /// Modification-time comparison tolerance in milliseconds
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: u64,
    /// Minimum gap between accepted change triggers for one path
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Fallback full reconciliation interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_save_suffix")]
    pub save_suffix: String,
    #[serde(default = "default_excluded_file")]
    pub excluded_file: String,
}

fn default_tolerance_ms() -> u64 {
    500
}

fn default_cooldown_ms() -> u64 {
    1000
}

fn default_interval_secs() -> u64 {
    10
}

fn default_save_suffix() -> String {
    DEFAULT_SAVE_SUFFIX.to_string()
}

fn default_excluded_file() -> String {
    DEFAULT_EXCLUDED_FILE.to_string()
}

impl SyncConfig {
    /// Config with default tuning; backups go to `<watch_path>/Backup`
    pub fn new(watch_path: impl Into<PathBuf>, s3: S3Config) -> Self {
        let watch_path = watch_path.into();
        Self {
            backup_dir: default_backup_dir(&watch_path),
            watch_path,
            process_name: None,
            s3,
            tolerance_ms: default_tolerance_ms(),
            cooldown_ms: default_cooldown_ms(),
            interval_secs: default_interval_secs(),
            save_suffix: default_save_suffix(),
            excluded_file: default_excluded_file(),
        }
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Check everything that must hold before the engine starts
    pub fn validate(&self) -> Result<()> {
        if self.watch_path.as_os_str().is_empty() {
            return Err(SyncError::Config("watch path cannot be empty".to_string()));
        }

        let meta = std::fs::metadata(&self.watch_path).map_err(|e| {
            SyncError::Config(format!(
                "watch path {} does not exist: {}",
                self.watch_path.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(SyncError::Config(format!(
                "watch path is not a directory: {}",
                self.watch_path.display()
            )));
        }

        let missing: Vec<&str> = [
            ("cloud-endpoint", &self.s3.endpoint),
            ("access-key", &self.s3.access_key),
            ("secret-key", &self.s3.secret_key),
            ("bucket-name", &self.s3.bucket),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(SyncError::Config(format!(
                "missing required arguments: {}",
                missing.join(", ")
            )));
        }

        if self.save_suffix.is_empty() {
            return Err(SyncError::Config("save suffix cannot be empty".to_string()));
        }
        if self.interval_secs == 0 {
            return Err(SyncError::Config(
                "sync interval must be at least one second".to_string(),
            ));
        }
        chrono::Duration::from_std(self.tolerance())
            .map_err(|e| SyncError::Config(format!("tolerance out of range: {}", e)))?;
        chrono::Duration::from_std(self.cooldown())
            .map_err(|e| SyncError::Config(format!("cooldown out of range: {}", e)))?;

        Ok(())
    }
}

/// `<watch_path>/Backup`
pub fn default_backup_dir(watch_path: &Path) -> PathBuf {
    watch_path.join("Backup")
}

/// Where the game keeps its saves: `<local app data>/RSDragonwilds/Saved/SaveGames`
pub fn default_watch_path() -> Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| {
        SyncError::Config("cannot determine the local application data directory".to_string())
    })?;
    Ok(base.join("RSDragonwilds").join("Saved").join("SaveGames"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn s3() -> S3Config {
        S3Config::new("localhost:9000", "key", "secret", "bucket")
    }

    #[test]
    fn test_validate_accepts_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::new(dir.path(), s3());
        assert!(config.validate().is_ok());
        assert_eq!(config.backup_dir, dir.path().join("Backup"));
    }

    #[test]
    fn test_validate_rejects_empty_watch_path() {
        let config = SyncConfig::new("", s3());
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_missing_path() {
        let config = SyncConfig::new("/non/existent/path/12345", s3());
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_file_as_watch_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("slot.sav");
        std::fs::write(&file, b"x").unwrap();
        let config = SyncConfig::new(&file, s3());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("not a directory"), "{}", err);
    }

    #[test]
    fn test_validate_lists_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::new(dir.path(), S3Config::new("localhost:9000", "", " ", "b"));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("access-key"), "{}", err);
        assert!(err.contains("secret-key"), "{}", err);
        assert!(!err.contains("bucket-name"), "{}", err);
    }

    #[test]
    fn test_endpoint_scheme() {
        let plain = S3Config::new("minio.lan:9000", "k", "s", "b");
        assert!(!plain.use_ssl);
        assert_eq!(plain.endpoint_url(), "http://minio.lan:9000");

        let tls = S3Config::new("https://s3.example.com", "k", "s", "b");
        assert!(tls.use_ssl);
        assert_eq!(tls.endpoint_url(), "https://s3.example.com");
    }

    #[test]
    fn test_config_defaults_from_json() {
        let json = r#"{
            "watch_path": "/saves",
            "process_name": null,
            "backup_dir": "/saves/Backup",
            "s3": {"endpoint": "localhost:9000", "access_key": "k", "secret_key": "s", "bucket": "b"}
        }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tolerance(), Duration::from_millis(500));
        assert_eq!(config.cooldown(), Duration::from_secs(1));
        assert_eq!(config.interval(), Duration::from_secs(10));
        assert_eq!(config.save_suffix, ".sav");
        assert_eq!(config.excluded_file, "EnhancedInputUserSettings.sav");
        assert_eq!(config.s3.region, "us-east-1");
    }

    #[test]
    fn test_pass_report_counts() {
        let mut report = PassReport::begin();
        report.record(SyncDecision::Upload);
        report.record(SyncDecision::Download);
        report.record(SyncDecision::NoOp);
        report.record(SyncDecision::NoOp);
        let report = report.finish();
        assert_eq!(report.transferred(), 2);
        assert_eq!(report.unchanged, 2);
        assert!(report.completed_at.is_some());
    }
}
