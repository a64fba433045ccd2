use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::services::post_policy::{GrantConditions, PostPolicySigner, PresignedPost};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("S3 bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Access denied to S3 bucket: {0}")]
    BucketAccessDenied(String),

    #[error("S3 bucket error: {code}")]
    BucketUnavailable { code: String },

    #[error("File not found in S3: {0}")]
    ObjectNotFound(String),

    #[error("Failed to generate presigned URL: {code}")]
    GrantFailed { code: String },

    #[error("S3 error: {code}")]
    Backend { code: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: i64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Blob store operations the service depends on.
///
/// `bucket()` is the bucket uploads are granted into; download and upload take
/// an explicit bucket because notifications name the bucket they came from.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// HEAD on the configured bucket
    async fn check_bucket(&self) -> StorageResult<()>;

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata>;

    async fn presign_post(
        &self,
        key: &str,
        conditions: &GrantConditions,
    ) -> StorageResult<PresignedPost>;

    /// Stream an object to a local file, returning the number of bytes written
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64>;

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: &str,
    ) -> StorageResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;
}

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    credentials: Option<SharedCredentialsProvider>,
    signer: PostPolicySigner,
}

impl S3ObjectStore {
    pub fn new(
        client: Client,
        bucket: String,
        credentials: Option<SharedCredentialsProvider>,
        signer: PostPolicySigner,
    ) -> Self {
        Self {
            client,
            bucket,
            credentials,
            signer,
        }
    }
}

fn error_code<E: ProvideErrorMetadata>(
    service_err: Option<&E>,
    fallback: impl FnOnce() -> String,
) -> String {
    service_err
        .and_then(|e| e.code())
        .map(str::to_string)
        .unwrap_or_else(fallback)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn check_bucket(&self) -> StorageResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                let status = err.raw_response().map(|r| r.status().as_u16());
                tracing::warn!(
                    bucket = %self.bucket,
                    status = ?status,
                    error = %DisplayErrorContext(&err),
                    "Bucket check failed"
                );
                match status {
                    Some(404) => Err(StorageError::BucketNotFound(self.bucket.clone())),
                    Some(403) => Err(StorageError::BucketAccessDenied(self.bucket.clone())),
                    Some(other) => Err(StorageError::BucketUnavailable {
                        code: error_code(err.as_service_error(), || other.to_string()),
                    }),
                    None => Err(StorageError::BucketUnavailable {
                        code: DisplayErrorContext(&err).to_string(),
                    }),
                }
            }
        }
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(out) => Ok(ObjectMetadata {
                size: out.content_length().unwrap_or(0),
                content_type: out.content_type().map(str::to_string),
                last_modified: out
                    .last_modified()
                    .and_then(|d| DateTime::from_timestamp(d.secs(), d.subsec_nanos())),
            }),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                    || err.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if not_found {
                    return Err(StorageError::ObjectNotFound(key.to_string()));
                }
                tracing::error!(key, error = %DisplayErrorContext(&err), "HEAD object failed");
                Err(StorageError::Backend {
                    code: error_code(err.as_service_error(), || {
                        DisplayErrorContext(&err).to_string()
                    }),
                })
            }
        }
    }

    async fn presign_post(
        &self,
        key: &str,
        conditions: &GrantConditions,
    ) -> StorageResult<PresignedPost> {
        let provider = self.credentials.as_ref().ok_or_else(|| StorageError::GrantFailed {
            code: "NoCredentialsProvider".to_string(),
        })?;

        let credentials = provider.provide_credentials().await.map_err(|e| {
            tracing::error!(key, error = %e, "Could not resolve credentials for upload grant");
            StorageError::GrantFailed {
                code: "CredentialsNotLoaded".to_string(),
            }
        })?;

        if let Some(expiry) = credentials.expiry() {
            if expiry <= std::time::SystemTime::now() {
                return Err(StorageError::GrantFailed {
                    code: "ExpiredToken".to_string(),
                });
            }
        }

        Ok(self
            .signer
            .sign(&credentials, &self.bucket, key, conditions, Utc::now()))
    }

    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        let start = Instant::now();
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    StorageError::Backend {
                        code: error_code(err.as_service_error(), || {
                            DisplayErrorContext(&err).to_string()
                        }),
                    }
                }
            })?;

        let mut reader = out.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        let bytes = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        tracing::debug!(
            bucket,
            key,
            bytes,
            duration_ms = start.elapsed().as_millis() as u64,
            "Object downloaded"
        );
        Ok(bytes)
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: &str,
    ) -> StorageResult<()> {
        let start = Instant::now();
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                tracing::error!(
                    bucket,
                    key,
                    error = %DisplayErrorContext(&err),
                    "PUT object failed"
                );
                StorageError::Backend {
                    code: error_code(err.as_service_error(), || {
                        DisplayErrorContext(&err).to_string()
                    }),
                }
            })?;

        tracing::debug!(
            bucket,
            key,
            duration_ms = start.elapsed().as_millis() as u64,
            "Object uploaded"
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StorageError::Backend {
                code: error_code(err.as_service_error(), || {
                    DisplayErrorContext(&err).to_string()
                }),
            })?;

        tracing::debug!(bucket, key, "Object deleted");
        Ok(())
    }
}
