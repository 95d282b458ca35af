//! In-memory object store

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;

use super::{local_mod_time, modtime_metadata, recover_mod_time, Storage};
use crate::error::{Result, SyncError};
use crate::types::FileRecord;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
    /// Whole seconds only, like most S3 implementations
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    bucket_exists: bool,
    objects: HashMap<String, StoredObject>,
    fail_uploads: bool,
    fail_downloads: bool,
    uploads: usize,
    downloads: usize,
}

/// Bucket kept in process memory, with failure injection for tests
#[derive(Debug)]
pub struct MemoryStorage {
    bucket: String,
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Store an object as if it had been uploaded from a file modified at `mod_time`
    pub fn insert(&self, name: &str, data: impl Into<Vec<u8>>, mod_time: DateTime<Utc>) {
        let metadata = modtime_metadata(mod_time).into_iter().collect();
        self.insert_raw(name, data, metadata, Utc::now());
    }

    /// Store an object with explicit metadata and native timestamp
    pub fn insert_raw(
        &self,
        name: &str,
        data: impl Into<Vec<u8>>,
        metadata: HashMap<String, String>,
        last_modified: DateTime<Utc>,
    ) {
        self.state.lock().objects.insert(
            name.to_string(),
            StoredObject {
                data: data.into(),
                metadata,
                last_modified: last_modified.trunc_subsecs(0),
            },
        );
    }

    /// Content of an object
    pub fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(name).map(|o| o.data.clone())
    }

    /// Custom metadata of an object
    pub fn metadata(&self, name: &str) -> Option<HashMap<String, String>> {
        self.state.lock().objects.get(name).map(|o| o.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_exists(&self) -> bool {
        self.state.lock().bucket_exists
    }

    /// Completed uploads so far
    pub fn upload_count(&self) -> usize {
        self.state.lock().uploads
    }

    /// Completed downloads so far
    pub fn download_count(&self) -> usize {
        self.state.lock().downloads
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.state.lock().fail_uploads = fail;
    }

    /// Make downloads write a truncated file and then fail
    pub fn set_fail_downloads(&self, fail: bool) {
        self.state.lock().fail_downloads = fail;
    }

    fn record(name: &str, object: &StoredObject) -> FileRecord {
        FileRecord::new(
            name,
            recover_mod_time(&object.metadata, object.last_modified),
            object.data.len() as u64,
        )
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<()> {
        self.state.lock().bucket_exists = true;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, object_name: &str) -> Result<u64> {
        if self.state.lock().fail_uploads {
            return Err(SyncError::Storage(format!(
                "injected upload failure for {}",
                object_name
            )));
        }

        let mod_time = local_mod_time(local_path).await?;
        let data = tokio::fs::read(local_path).await?;
        let size = data.len() as u64;

        let mut state = self.state.lock();
        state.objects.insert(
            object_name.to_string(),
            StoredObject {
                data,
                metadata: modtime_metadata(mod_time).into_iter().collect(),
                last_modified: Utc::now().trunc_subsecs(0),
            },
        );
        state.uploads += 1;
        Ok(size)
    }

    async fn download(&self, object_name: &str, local_path: &Path) -> Result<u64> {
        let (object, fail) = {
            let state = self.state.lock();
            (state.objects.get(object_name).cloned(), state.fail_downloads)
        };
        let object = object.ok_or_else(|| {
            SyncError::Storage(format!("object {} not found in {}", object_name, self.bucket))
        })?;

        if fail {
            let half = object.data.len() / 2;
            tokio::fs::write(local_path, &object.data[..half]).await?;
            return Err(SyncError::Storage(format!(
                "injected download failure for {}",
                object_name
            )));
        }

        tokio::fs::write(local_path, &object.data).await?;
        self.state.lock().downloads += 1;
        Ok(object.data.len() as u64)
    }

    async fn stat(&self, object_name: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .state
            .lock()
            .objects
            .get(object_name)
            .map(|o| Self::record(object_name, o)))
    }

    async fn list(&self) -> Result<Vec<FileRecord>> {
        let state = self.state.lock();
        let mut records: Vec<FileRecord> = state
            .objects
            .iter()
            .map(|(name, o)| Self::record(name, o))
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
