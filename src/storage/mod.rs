//! Remote object storage
//!
//! The sync engine only talks to the [`Storage`] trait. Two backends ship:
//! an S3-compatible adapter (behind the `cloud` feature) and an in-memory
//! store used to exercise the engine without network I/O.
//!
//! Uploads carry the local modification time as custom metadata so that
//! sub-second precision survives stores whose native timestamps are coarser.

mod memory;
#[cfg(feature = "cloud")]
mod s3;

pub use memory::MemoryStorage;
#[cfg(feature = "cloud")]
pub use s3::S3Storage;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{FileRecord, TIMESTAMP_FORMAT};

/// Metadata key holding nanoseconds since the Unix epoch
pub const MODTIME_KEY: &str = "Modtime";

/// Metadata key holding the same instant in human-readable form
pub const MODTIME_STRING_KEY: &str = "ModtimeString";

/// Operations the sync engine needs from a bucket
#[async_trait]
pub trait Storage: Send + Sync {
    /// Bucket name, for log lines
    fn bucket(&self) -> &str;

    /// Create the bucket unless it already exists
    async fn ensure_bucket(&self) -> Result<()>;

    /// Upload a local file, tagging it with its modification time. Returns bytes sent.
    async fn upload(&self, local_path: &Path, object_name: &str) -> Result<u64>;

    /// Download an object to `local_path`. Returns bytes received.
    async fn download(&self, object_name: &str, local_path: &Path) -> Result<u64>;

    /// Object metadata, or `None` when the object does not exist
    async fn stat(&self, object_name: &str) -> Result<Option<FileRecord>>;

    /// Every object in the bucket
    async fn list(&self) -> Result<Vec<FileRecord>>;
}

/// Metadata pairs attached to every upload
pub fn modtime_metadata(mod_time: DateTime<Utc>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(2);
    if let Some(nanos) = mod_time.timestamp_nanos_opt() {
        pairs.push((MODTIME_KEY.to_string(), nanos.to_string()));
    }
    pairs.push((
        MODTIME_STRING_KEY.to_string(),
        mod_time.format(TIMESTAMP_FORMAT).to_string(),
    ));
    pairs
}

/// Modification time of a remote object.
///
/// Prefers the `Modtime` metadata value when it parses, otherwise the store's
/// native last-modified timestamp. Key lookup ignores case since S3 lower-cases
/// user metadata keys.
pub fn recover_mod_time(metadata: &HashMap<String, String>, native: DateTime<Utc>) -> DateTime<Utc> {
    let raw = metadata
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(MODTIME_KEY))
        .map(|(_, value)| value.trim());

    match raw {
        Some(raw) if !raw.is_empty() => match raw.parse::<i64>() {
            Ok(nanos) => DateTime::from_timestamp_nanos(nanos),
            Err(e) => {
                tracing::warn!("Invalid modtime metadata {:?}: {}", raw, e);
                native
            }
        },
        _ => native,
    }
}

/// Modification time of a local file, in UTC
pub async fn local_mod_time(path: &Path) -> Result<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}
