//! S3-compatible storage backend (AWS S3, MinIO, R2)

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};

use super::{local_mod_time, modtime_metadata, recover_mod_time, Storage};
use crate::error::{Result, SyncError};
use crate::types::{FileRecord, S3Config, DEFAULT_REGION};

/// Bucket on an S3-compatible endpoint
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    region: String,
}

impl S3Storage {
    /// Build a client with static credentials and path-style addressing
    pub async fn connect(config: &S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(SyncError::Config("bucket name cannot be empty".to_string()));
        }

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "cloudsync-static",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .load()
            .await;

        // MinIO does not serve virtual-hosted buckets by default
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(
            "Using bucket {} at {}",
            config.bucket,
            config.endpoint_url()
        );

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
        })
    }
}

fn storage_error(context: &str, err: impl std::error::Error) -> SyncError {
    SyncError::Storage(format!("{}: {}", context, DisplayErrorContext(err)))
}

fn to_utc(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl Storage for S3Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        // Create-and-tolerate instead of exists-then-create, so two machines
        // starting against an empty store cannot both fail
        match request.send().await {
            Ok(_) => {
                tracing::info!("Created bucket {}", self.bucket);
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_bucket_already_owned_by_you()
                    || service_error.is_bucket_already_exists()
                {
                    tracing::debug!("Bucket {} already exists", self.bucket);
                    Ok(())
                } else {
                    Err(storage_error("failed to create bucket", service_error))
                }
            }
        }
    }

    async fn upload(&self, local_path: &Path, object_name: &str) -> Result<u64> {
        let mod_time = local_mod_time(local_path).await?;
        let data = tokio::fs::read(local_path).await?;
        let size = data.len() as u64;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(object_name)
            .body(ByteStream::from(data));
        for (key, value) in modtime_metadata(mod_time) {
            request = request.metadata(key, value);
        }

        request
            .send()
            .await
            .map_err(|e| storage_error("failed to upload file", e))?;

        tracing::info!(
            "Uploaded {} bytes to s3://{}/{}",
            size,
            self.bucket,
            object_name
        );
        Ok(size)
    }

    async fn download(&self, object_name: &str, local_path: &Path) -> Result<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(object_name)
            .send()
            .await
            .map_err(|e| storage_error("failed to download file", e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| storage_error("failed to read object body", e))?
            .into_bytes();

        tokio::fs::write(local_path, &data).await?;

        tracing::info!(
            "Downloaded {} bytes from s3://{}/{}",
            data.len(),
            self.bucket,
            object_name
        );
        Ok(data.len() as u64)
    }

    async fn stat(&self, object_name: &str) -> Result<Option<FileRecord>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(object_name)
            .send()
            .await
        {
            Ok(head) => {
                let native = head
                    .last_modified()
                    .and_then(to_utc)
                    .unwrap_or_default();
                let empty = HashMap::new();
                let metadata = head.metadata().unwrap_or(&empty);

                Ok(Some(FileRecord::new(
                    object_name,
                    recover_mod_time(metadata, native),
                    head.content_length().unwrap_or(0).max(0) as u64,
                )))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(storage_error("failed to stat object", service_error))
                }
            }
        }
    }

    async fn list(&self) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| storage_error("error listing objects", e))?;

            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                // Listings omit user metadata, so head each object for the precise time
                if let Some(record) = self.stat(key).await? {
                    records.push(record);
                }
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(records)
    }
}
