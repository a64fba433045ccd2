use axum::{
    Json,
    extract::{Query, State},
};
use validator::Validate;

use crate::AppState;
use crate::api::error::AppError;
use crate::models::{ConfirmUploadParams, UploadConfirmation, UploadGrant, UploadRequest};

/// Issue a direct-to-bucket upload grant
#[utoipa::path(
    post,
    path = "/upload/presigned-url",
    request_body = UploadRequest,
    responses(
        (status = 200, description = "Upload grant issued", body = UploadGrant),
        (status = 422, description = "Request failed validation"),
        (status = 500, description = "Bucket unreachable or grant failed")
    ),
    tag = "upload"
)]
pub async fn create_presigned_url(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<UploadGrant>, AppError> {
    request.validate()?;
    let grant = state.uploads.authorize(&request).await?;
    Ok(Json(grant))
}

#[utoipa::path(
    post,
    path = "/upload/confirm",
    params(
        ("file_key" = String, Query, description = "Key returned with the upload grant"),
        ("user_id" = String, Query, description = "Uploading user")
    ),
    responses(
        (status = 200, description = "Object exists", body = UploadConfirmation),
        (status = 404, description = "Object not found"),
        (status = 500, description = "Storage error")
    ),
    tag = "upload"
)]
pub async fn confirm_upload(
    State(state): State<AppState>,
    Query(params): Query<ConfirmUploadParams>,
) -> Result<Json<UploadConfirmation>, AppError> {
    if params.file_key.is_empty() {
        return Err(AppError::BadRequest("file_key is required".to_string()));
    }
    let confirmation = state
        .uploads
        .confirm(&params.file_key, &params.user_id)
        .await?;
    Ok(Json(confirmation))
}
