pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::services::poller::NotificationPoller;
use crate::services::storage::ObjectStore;
use crate::services::upload_service::UploadService;
use api::handlers;
use api::middleware::request_id::REQUEST_ID_HEADER;
use axum::{
    Router,
    extract::Request,
    http::Response,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::upload::create_presigned_url,
        handlers::upload::confirm_upload,
        handlers::queue::poll_sqs,
        handlers::health::health_check,
    ),
    components(
        schemas(
            models::FileType,
            models::UploadRequest,
            models::UploadGrant,
            models::FileInfo,
            models::UploadConfirmation,
            models::MessageOutcome,
            models::PollSummary,
            models::HealthResponse,
        )
    ),
    tags(
        (name = "upload", description = "Direct-to-bucket upload endpoints"),
        (name = "queue", description = "Bucket notification processing"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn ObjectStore>,
    pub uploads: Arc<UploadService>,
    /// Present only when a notification queue is configured
    pub poller: Option<Arc<NotificationPoller>>,
}

impl AppState {
    pub fn new(storage: Arc<dyn ObjectStore>, poller: Option<Arc<NotificationPoller>>) -> Self {
        Self {
            uploads: Arc::new(UploadService::new(storage.clone())),
            storage,
            poller,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    // Inside the request-id layer so every span sees the final id
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &Request, _span: &Span| {
            tracing::info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
            tracing::info!(
                "📤 Finished in {:?} with status {}",
                latency,
                response.status()
            );
        });

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route(
            "/upload/presigned-url",
            post(handlers::upload::create_presigned_url),
        )
        .route("/upload/confirm", post(handlers::upload::confirm_upload))
        .route("/poll-sqs", get(handlers::queue::poll_sqs))
        .route("/health", get(handlers::health::health_check))
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(trace_layer)
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
