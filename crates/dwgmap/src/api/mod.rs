//! HTTP status and submission API.

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broadcast::JobProgressBroadcaster;
use crate::job::JobStore;
use crate::scheduler::JobScheduler;
use crate::settings::Settings;

pub use error::{ApiError, ApiResult};

/// Uploads larger than this are rejected at the framework boundary.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<JobStore>,
    pub scheduler: Arc<JobScheduler>,
    pub broadcaster: JobProgressBroadcaster,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/events", get(routes::stream_events))
        .route("/api/convert", post(routes::submit_conversion))
        .route("/api/convert/{job_id}", get(routes::get_conversion))
        .route("/api/convert/{job_id}/gpkg", get(routes::download_gpkg))
        .route("/api/status/{job_id}", get(routes::get_status))
        .route("/api/layers/{job_id}", get(routes::get_layers))
        .route("/api/jobs", get(routes::list_jobs))
        .route("/api/jobs/{job_id}/cancel", post(routes::cancel_job))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
