use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{FileInfo, UploadConfirmation, UploadGrant, UploadRequest};
use crate::services::post_policy::GrantConditions;
use crate::services::storage::{ObjectStore, StorageResult};
use crate::utils::keys::raw_key;

/// Issues upload grants and confirms finished uploads. Stateless.
pub struct UploadService {
    storage: Arc<dyn ObjectStore>,
}

impl UploadService {
    pub fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self { storage }
    }

    pub async fn authorize(&self, request: &UploadRequest) -> StorageResult<UploadGrant> {
        self.authorize_at(request, Utc::now()).await
    }

    /// `now` only feeds the fallback object name
    pub async fn authorize_at(
        &self,
        request: &UploadRequest,
        now: DateTime<Utc>,
    ) -> StorageResult<UploadGrant> {
        self.storage.check_bucket().await?;

        let file_key = raw_key(
            &request.user_id,
            request.filename.as_deref(),
            request.file_type,
            now,
        );

        let conditions = GrantConditions {
            content_type: request.file_type.mime().to_string(),
            max_file_size: request.max_file_size,
            expires_in: Duration::from_secs(request.expiration_seconds),
        };

        let post = self.storage.presign_post(&file_key, &conditions).await?;

        tracing::info!(
            user_id = %request.user_id,
            key = %file_key,
            expires_in = request.expiration_seconds,
            max_file_size = request.max_file_size,
            "Upload grant issued"
        );

        Ok(UploadGrant {
            upload_url: post.url,
            form_fields: post.fields,
            file_key,
            expires_in: request.expiration_seconds,
            max_file_size: request.max_file_size,
            content_type: conditions.content_type,
            bucket: self.storage.bucket().to_string(),
        })
    }

    /// Look up an uploaded object. `user_id` is only logged.
    pub async fn confirm(
        &self,
        file_key: &str,
        user_id: &str,
    ) -> StorageResult<UploadConfirmation> {
        let meta = self.storage.head_object(file_key).await?;

        tracing::info!(user_id, key = file_key, size = meta.size, "Upload confirmed");

        Ok(UploadConfirmation {
            status: "success".to_string(),
            message: "File upload confirmed".to_string(),
            file_info: FileInfo {
                key: file_key.to_string(),
                size: meta.size,
                content_type: meta.content_type,
                last_modified: meta.last_modified.map(|t| t.to_rfc3339()),
            },
        })
    }
}
