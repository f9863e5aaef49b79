// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP intake gateway: the external surface of the cardflow pipeline.
//!
//! Translates HTTP to registry operations: authenticated upload intake,
//! status polling, manifest retrieval through the consumer-shape adapter,
//! and asset streaming out of per-job result directories.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path as AxPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cdf_config::PipelineConfig;
use cdf_core::{JobState, JobView};
use cdf_error::ErrorCode;
use cdf_manifest::MANIFEST_FILENAME;
use cdf_registry::JobRegistry;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub mod assets;
pub mod auth;
pub mod middleware;
pub mod submit;

/// Shared state behind every handler.
pub struct AppState {
    /// The job registry and scheduler.
    pub registry: Arc<JobRegistry>,
    /// Runtime configuration.
    pub config: Arc<PipelineConfig>,
    /// Server start time, for the health uptime field.
    pub started_at: Instant,
}

impl AppState {
    /// Free bytes on the intake volume, if the platform reports them.
    pub fn free_disk_bytes(&self) -> Option<u64> {
        fs2::available_space(&self.config.intake_dir).ok()
    }

    /// Whether free disk has fallen below the configured floor.
    pub fn disk_low(&self) -> bool {
        self.free_disk_bytes()
            .is_some_and(|free| free < self.config.min_free_disk_bytes)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured API error; the body never carries more than the stable code,
/// a short message, and the job id when one is in scope.
#[derive(Debug)]
pub struct ApiError {
    /// Stable taxonomy code.
    pub code: ErrorCode,
    /// Short human-readable message.
    pub message: String,
    /// The job in scope, if any.
    pub job_id: Option<Uuid>,
    /// Surface-level status refinement (415 for bad extensions, 503 for a
    /// saturated host); `None` uses the code's contractual status.
    status_override: Option<StatusCode>,
}

impl ApiError {
    /// Create an error with the code's contractual HTTP status.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            job_id: None,
            status_override: None,
        }
    }

    /// Attach the job id the error concerns.
    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// 415 — extension outside the accepted set.
    pub fn unsupported_media(message: impl Into<String>) -> Self {
        Self {
            status_override: Some(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            ..Self::new(ErrorCode::InvalidRequest, message)
        }
    }

    /// 503 — the host cannot accept work right now.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status_override: Some(StatusCode::SERVICE_UNAVAILABLE),
            ..Self::new(ErrorCode::Internal, message)
        }
    }

    fn status(&self) -> StatusCode {
        self.status_override.unwrap_or_else(|| {
            StatusCode::from_u16(self.code.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.code.as_str(),
            "message": self.message,
        });
        if let Some(job_id) = self.job_id {
            body["jobId"] = json!(job_id.to_string());
        }
        (self.status(), Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the Axum router with all gateway routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);

    Router::new()
        .route("/jobs", post(submit::submit_job))
        .route("/status/{id}", get(job_status))
        .route("/jobs/{id}/result.json", get(job_result))
        .route("/jobs/{id}/assets/{name}", get(assets::stream_asset))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::RequestLogger::layer))
        .layer(middleware::cors_layer())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueHealth {
    depth: usize,
    capacity: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "url": format!("http://localhost:{}", state.config.port),
        "workers": state.config.workers,
        "running": state.registry.running_count(),
        "queue": QueueHealth {
            depth: state.registry.queue_depth().await,
            capacity: state.registry.queue_capacity(),
        },
        "lowDisk": state.disk_low(),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Jobs are addressed by UUID; anything else is indistinguishable from an
/// id that never existed.
fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse::<Uuid>()
        .map_err(|_| ApiError::new(ErrorCode::NotFound, format!("unknown job: {raw}")))
}

async fn job_status(
    AxPath(id): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<JobView>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let mut view = state
        .registry
        .status(job_id)
        .await
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "unknown job").with_job(job_id))?;

    if state.disk_low() {
        view.warning = Some("host is low on disk; new uploads may be refused".into());
    }
    Ok(Json(view))
}

async fn job_result(
    AxPath(id): AxPath<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&id)?;
    let record = state
        .registry
        .snapshot(job_id)
        .await
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "unknown job").with_job(job_id))?;

    match record.state {
        JobState::Succeeded => {
            let result_dir = record.result_dir.as_ref().ok_or_else(|| {
                ApiError::new(ErrorCode::Internal, "succeeded job without result directory")
            })?;
            let raw = tokio::fs::read(result_dir.join(MANIFEST_FILENAME))
                .await
                .map_err(|_| {
                    ApiError::new(ErrorCode::Internal, "manifest unreadable").with_job(job_id)
                })?;
            let manifest: serde_json::Value = serde_json::from_slice(&raw).map_err(|_| {
                ApiError::new(ErrorCode::Internal, "manifest corrupt").with_job(job_id)
            })?;
            Ok(Json(cdf_manifest::adapt(&manifest)).into_response())
        }
        JobState::Queued | JobState::Running => Err(ApiError::new(
            ErrorCode::NotReady,
            "job has not completed yet",
        )
        .with_job(job_id)),
        JobState::Failed | JobState::TimedOut | JobState::Cancelled => {
            let code = record
                .error
                .as_ref()
                .map(|e| e.code)
                .unwrap_or(ErrorCode::Internal);
            let message = record
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "job did not succeed".into());
            Err(ApiError::new(code, message).with_job(job_id))
        }
    }
}
