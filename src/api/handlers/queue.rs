use axum::{Json, extract::State};

use crate::AppState;
use crate::api::error::AppError;
use crate::models::PollSummary;

/// Run one notification poll cycle on demand
#[utoipa::path(
    get,
    path = "/poll-sqs",
    responses(
        (status = 200, description = "Poll cycle summary", body = PollSummary),
        (status = 503, description = "No queue configured")
    ),
    tag = "queue"
)]
pub async fn poll_sqs(State(state): State<AppState>) -> Result<Json<PollSummary>, AppError> {
    let poller = state.poller.as_ref().ok_or(AppError::QueueNotConfigured)?;
    let summary = poller.poll_once().await?;
    Ok(Json(summary))
}
