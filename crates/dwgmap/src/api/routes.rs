//! Route handlers and response projections.

use std::path::Path;

use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;
use uuid::Uuid;

use crate::error::SubmitError;
use crate::job::{Bbox, JobRecord, JobStatus, LayerDescriptor};
use crate::scheduler::{CancelOutcome, QueuedJob};

use super::error::{ApiError, ApiResult};
use super::AppState;

/// Compact polling projection.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
}

impl From<&JobRecord> for StatusResponse {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            status: record.status,
            progress: record.progress,
            message: record.message.clone(),
        }
    }
}

/// Full record projection: flat fields, absent products as `null`.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub dxf_path: Option<String>,
    pub gpkg_path: Option<String>,
    pub layer_name: Option<String>,
    pub mvt_url: Option<String>,
    pub raster_url: Option<String>,
    pub wmts_url: Option<String>,
    /// `[min_x, min_y, max_x, max_y]`, omitted unless geographically valid.
    pub bbox: Option<Bbox>,
}

impl From<&JobRecord> for ConvertResponse {
    fn from(record: &JobRecord) -> Self {
        let package = record.outputs.package.as_ref();
        let publish = record.outputs.publish.as_ref();
        Self {
            job_id: record.id.clone(),
            status: record.status,
            progress: record.progress,
            message: record.message.clone(),
            dxf_path: record.outputs.convert.as_ref().map(|c| c.dxf_path.clone()),
            gpkg_path: package.map(|p| p.gpkg_path.clone()),
            layer_name: publish.map(|p| p.layer_name.clone()),
            mvt_url: publish.map(|p| p.mvt_url.clone()),
            raster_url: publish.map(|p| p.raster_url.clone()),
            wmts_url: publish.map(|p| p.wmts_url.clone()),
            bbox: package.and_then(|p| p.bbox).filter(Bbox::is_geographic),
        }
    }
}

/// One row of the job listing.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub filename: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            filename: record.source_name.clone(),
            status: record.status,
            progress: record.progress,
            message: record.message.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// `GET /api/events` — server-sent progress events across all jobs.
/// Receivers that fall behind the channel miss events; clients recover the
/// current state through `/api/status/{job_id}`.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = BroadcastStream::new(state.broadcaster.subscribe())
        .filter_map(|event| event.ok())
        .map(|event| Event::default().json_data(&event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `POST /api/convert` — accept a multipart DWG upload and enqueue it.
pub async fn submit_conversion(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
            upload = Some((filename, bytes));
            break;
        }
    }
    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("Missing multipart field 'file'"))?;

    if !filename.to_lowercase().ends_with(".dwg") {
        return Err(SubmitError::UnsupportedFileType(filename).into());
    }
    if bytes.is_empty() {
        return Err(SubmitError::EmptyUpload.into());
    }

    let job_id = Uuid::new_v4().simple().to_string();
    let job_dir = state.settings.jobs_dir().join(&job_id);

    // Strip any path components a client smuggled into the filename.
    let safe_name = Path::new(&filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{job_id}.dwg"));
    let dwg_path = job_dir.join(&safe_name);

    tokio::fs::create_dir_all(&job_dir)
        .await
        .map_err(|source| {
            ApiError::from(SubmitError::StoreUpload {
                path: job_dir.clone(),
                source,
            })
        })?;
    tokio::fs::write(&dwg_path, &bytes).await.map_err(|source| {
        ApiError::from(SubmitError::StoreUpload {
            path: dwg_path.clone(),
            source,
        })
    })?;

    info!(job_id = %job_id, filename = %safe_name, size = bytes.len(), "Upload accepted");

    state.scheduler.submit(QueuedJob {
        job_id: job_id.clone(),
        source_name: filename,
        dwg_path,
        job_dir,
    })?;

    let record = state
        .store
        .get(&job_id)
        .ok_or_else(|| ApiError::internal("Job record vanished after submit"))?;
    Ok((StatusCode::CREATED, Json(StatusResponse::from(&record))))
}

/// `GET /api/status/{job_id}` — compact polling endpoint.
pub async fn get_status(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<StatusResponse>> {
    let record = lookup(&state, &job_id)?;
    Ok(Json(StatusResponse::from(&record)))
}

/// `GET /api/convert/{job_id}` — full record projection.
pub async fn get_conversion(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<ConvertResponse>> {
    let record = lookup(&state, &job_id)?;
    Ok(Json(ConvertResponse::from(&record)))
}

/// `GET /api/layers/{job_id}` — layer descriptors of the packaged container.
/// Available as soon as the package stage finished, whatever happened later.
pub async fn get_layers(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<Vec<LayerDescriptor>>> {
    let record = lookup(&state, &job_id)?;
    match record.outputs.package {
        Some(package) => Ok(Json(package.layers)),
        None => Err(ApiError::not_found("GeoPackage file not found")),
    }
}

/// `GET /api/jobs` — all known jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    let summaries = state.store.list().iter().map(JobSummary::from).collect();
    Json(summaries)
}

/// `POST /api/jobs/{job_id}/cancel` — request cooperative cancellation.
pub async fn cancel_job(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<Json<CancelResponse>> {
    match state.scheduler.cancel(&job_id) {
        CancelOutcome::Accepted => Ok(Json(CancelResponse {
            job_id,
            cancelled: true,
        })),
        CancelOutcome::AlreadyTerminal => Ok(Json(CancelResponse {
            job_id,
            cancelled: false,
        })),
        CancelOutcome::NotFound => Err(ApiError::not_found("Job not found")),
    }
}

/// `GET /api/convert/{job_id}/gpkg` — download the packaged container.
pub async fn download_gpkg(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> ApiResult<impl IntoResponse> {
    let record = lookup(&state, &job_id)?;
    let gpkg_path = record
        .outputs
        .package
        .as_ref()
        .map(|p| p.gpkg_path.clone())
        .ok_or_else(|| ApiError::not_found("GeoPackage file not found"))?;

    let bytes = tokio::fs::read(&gpkg_path)
        .await
        .map_err(|_| ApiError::not_found("GeoPackage file not found"))?;

    let download_name = Path::new(&gpkg_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{job_id}.gpkg"));

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/geopackage+sqlite3".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{download_name}\""),
            ),
        ],
        bytes,
    ))
}

fn lookup(state: &AppState, job_id: &str) -> Result<JobRecord, ApiError> {
    state
        .store
        .get(job_id)
        .ok_or_else(|| ApiError::not_found("Job not found"))
}
