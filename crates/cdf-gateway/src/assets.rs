// SPDX-License-Identifier: MIT OR Apache-2.0
//! Asset streaming out of per-job result directories.
//!
//! Asset names are opaque single-segment identifiers; the job's result
//! directory is the only filesystem root this module ever opens, read-only.

use crate::{AppState, ApiError};
use axum::{
    body::Body,
    extract::{Path as AxPath, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use cdf_core::JobState;
use cdf_error::ErrorCode;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Immutable-asset cache policy: result directories never change once a job
/// has succeeded, so clients may cache for a year.
const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Reject anything that is not a single plain path segment.
pub fn validate_asset_name(name: &str) -> Result<(), ApiError> {
    let rejected = name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.');
    if rejected {
        return Err(ApiError::new(
            ErrorCode::InvalidRequest,
            "asset names are single path segments",
        ));
    }
    Ok(())
}

fn content_type_for(name: &str) -> &'static str {
    let extension = name.rsplit('.').next().unwrap_or("");
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

fn etag_for(job_id: Uuid, name: &str) -> String {
    format!("\"{job_id}-{name}\"")
}

/// `GET /jobs/{id}/assets/{name}`
pub async fn stream_asset(
    AxPath((id, name)): AxPath<(String, String)>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Traversal is refused before the job id is even looked at.
    validate_asset_name(&name)?;

    let job_id: Uuid = id
        .parse()
        .map_err(|_| ApiError::new(ErrorCode::NotFound, format!("unknown job: {id}")))?;
    let record = state
        .registry
        .snapshot(job_id)
        .await
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "unknown job").with_job(job_id))?;

    if record.state != JobState::Succeeded {
        return Err(ApiError::new(ErrorCode::NotFound, "no published assets").with_job(job_id));
    }
    let result_dir = record.result_dir.as_ref().ok_or_else(|| {
        ApiError::new(ErrorCode::Internal, "succeeded job without result directory")
    })?;

    let etag = etag_for(job_id, &name);
    if let Some(candidate) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if candidate == etag {
            return Ok((
                StatusCode::NOT_MODIFIED,
                [(header::ETAG, etag)],
            )
                .into_response());
        }
    }

    let path = result_dir.join(&name);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::new(ErrorCode::NotFound, "unknown asset").with_job(job_id))?;
    let len = file
        .metadata()
        .await
        .map_err(|_| ApiError::new(ErrorCode::Internal, "asset unreadable"))?
        .len();

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&name).to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
            (header::ETAG, etag),
        ],
        body,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
