use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("SQS queue is not configured")]
    QueueNotConfigured,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Storage(StorageError::ObjectNotFound(key)) => {
                (StatusCode::NOT_FOUND, format!("File not found in S3: {}", key))
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::QueueNotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SQS queue is not configured".to_string(),
            ),
            AppError::Queue(e) => {
                tracing::error!("Queue error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = AppError::from(StorageError::ObjectNotFound("1/raw/a.xml".into()));
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let denied = AppError::from(StorageError::BucketAccessDenied("b".into()));
        assert_eq!(
            denied.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        assert_eq!(
            AppError::QueueNotConfigured.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let bad = AppError::BadRequest("missing file_key".into());
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let queue = AppError::from(QueueError::Receive("timeout".into()));
        assert_eq!(
            queue.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
