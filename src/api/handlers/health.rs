use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::models::HealthResponse;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, storage) = match state.storage.check_bucket().await {
        Ok(()) => ("ok", "connected".to_string()),
        Err(e) => ("degraded", e.to_string()),
    };

    let queue = if state.poller.is_some() {
        "configured"
    } else {
        "disabled"
    };

    Json(HealthResponse {
        status: status.to_string(),
        storage,
        queue: queue.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
