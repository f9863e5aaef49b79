// SPDX-License-Identifier: MIT OR Apache-2.0
//! Upload intake: multipart parsing, disk spooling, and job admission.
//!
//! Uploads are spooled to the intake directory chunk by chunk while the
//! SHA-256 digest and byte count accumulate, so a 100 MB file never sits in
//! memory and the size limit trips mid-stream.

use crate::{AppState, ApiError, auth};
use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::HeaderMap,
};
use cdf_core::{JobOptions, JobRecord};
use cdf_error::ErrorCode;
use chrono::{DateTime, Utc};
use cdf_registry::RegistryError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Accepted upload extensions (lowercase, with dot).
const ACCEPTED_EXTENSIONS: &[&str] = &[".ai", ".pdf"];

/// Rough per-job wall time used for the queue estimate.
const ESTIMATED_SECONDS_PER_JOB: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    /// Client-proposed job id; the server substitutes its own when the
    /// proposal is absent, malformed, or already taken.
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
}

/// Body of a successful submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Assigned job id.
    pub job_id: Uuid,
    /// Always `"queued"`.
    pub status: &'static str,
    /// When the upload was accepted.
    pub submitted_at: DateTime<Utc>,
    /// Rough seconds until completion, based on queue depth.
    pub estimated_time: u64,
}

struct SpooledFile {
    path: PathBuf,
    filename: String,
    sha256_hex: String,
    len: u64,
}

async fn discard(path: &PathBuf) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %err, "spooled upload not removed");
    }
}

/// `POST /jobs?jobId={id}`
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    auth::verify_api_key(&headers, &state.config.api_key)?;

    if state.disk_low() {
        return Err(ApiError::unavailable("host is low on disk"));
    }

    let job_id = resolve_job_id(&state, query.job_id.as_deref()).await;

    let (file, options_raw, timestamp) =
        read_multipart(&state, job_id, multipart).await?;

    let Some(file) = file else {
        return Err(ApiError::new(
            ErrorCode::InvalidRequest,
            "multipart body must contain a file part",
        ));
    };

    let options = match options_raw {
        None => JobOptions::default(),
        Some(raw) => match serde_json::from_str::<JobOptions>(&raw) {
            Ok(options) => options,
            Err(err) => {
                discard(&file.path).await;
                return Err(ApiError::new(
                    ErrorCode::InvalidRequest,
                    format!("malformed options: {err}"),
                ));
            }
        },
    };

    let Some(timestamp) = timestamp else {
        discard(&file.path).await;
        return Err(ApiError::new(
            ErrorCode::Unauthorized,
            "missing timestamp field",
        ));
    };

    let verified = auth::verify_signature(
        &headers,
        &state.config.hmac_secret,
        &file.sha256_hex,
        &options.canonical_json(),
        &timestamp,
        Utc::now().timestamp_millis(),
    );
    if let Err(err) = verified {
        discard(&file.path).await;
        return Err(err);
    }

    let submitted_at = Utc::now();
    let record = JobRecord::new(
        job_id,
        file.filename.clone(),
        file.path.clone(),
        file.len,
        options,
        submitted_at,
    );

    if let Err(err) = state.registry.submit(record).await {
        discard(&file.path).await;
        return Err(match err {
            RegistryError::QueueFull { capacity } => ApiError::new(
                ErrorCode::QueueFull,
                format!("queue is full (capacity {capacity}); retry later"),
            ),
            other => ApiError::new(ErrorCode::Internal, other.to_string()),
        });
    }

    let depth = state.registry.queue_depth().await as u64;
    let running = state.registry.running_count() as u64;
    info!(job_id = %job_id, file = %file.filename, bytes = file.len, "job submitted");

    Ok(Json(SubmitResponse {
        job_id,
        status: "queued",
        submitted_at,
        estimated_time: (depth + running.max(1)) * ESTIMATED_SECONDS_PER_JOB,
    }))
}

/// Accept the client's proposal when it is a fresh, well-formed UUID.
async fn resolve_job_id(state: &AppState, proposed: Option<&str>) -> Uuid {
    if let Some(raw) = proposed {
        if let Ok(id) = raw.parse::<Uuid>() {
            if state.registry.status(id).await.is_none() {
                return id;
            }
            warn!(job_id = %id, "proposed job id already taken; substituting");
        }
    }
    Uuid::new_v4()
}

fn accepted_extension(filename: &str) -> Option<&'static str> {
    let lower = filename.to_lowercase();
    ACCEPTED_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| &ext[1..])
}

async fn read_multipart(
    state: &AppState,
    job_id: Uuid,
    mut multipart: Multipart,
) -> Result<(Option<SpooledFile>, Option<String>, Option<String>), ApiError> {
    let mut file: Option<SpooledFile> = None;
    let mut options: Option<String> = None;
    let mut timestamp: Option<String> = None;

    let bad_body =
        |err: axum::extract::multipart::MultipartError| {
            ApiError::new(ErrorCode::InvalidRequest, format!("malformed multipart body: {err}"))
        };

    let outcome = loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break Ok(()),
            Err(err) => break Err(bad_body(err)),
        };
        let part = field.name().map(str::to_string);
        match part.as_deref() {
            Some("file") => {
                let Some(filename) = field.file_name().map(str::to_string) else {
                    break Err(ApiError::new(
                        ErrorCode::InvalidRequest,
                        "file part without a filename",
                    ));
                };
                let Some(extension) = accepted_extension(&filename) else {
                    break Err(ApiError::unsupported_media(
                        "only .ai and .pdf uploads are accepted",
                    ));
                };
                match spool_file(state, job_id, extension, filename, field).await {
                    Ok(spooled) => file = Some(spooled),
                    Err(err) => break Err(err),
                }
            }
            Some("options") => match field.text().await {
                Ok(text) => options = Some(text),
                Err(err) => break Err(bad_body(err)),
            },
            Some("timestamp") => match field.text().await {
                Ok(text) => timestamp = Some(text),
                Err(err) => break Err(bad_body(err)),
            },
            _ => {
                // Unknown parts are drained and ignored.
                let _ = field.bytes().await;
            }
        }
    };

    if let Err(err) = outcome {
        // Never leave a spooled upload behind on a rejected request.
        if let Some(spooled) = &file {
            discard(&spooled.path).await;
        }
        return Err(err);
    }

    Ok((file, options, timestamp))
}

async fn spool_file(
    state: &AppState,
    job_id: Uuid,
    extension: &str,
    filename: String,
    mut field: axum::extract::multipart::Field<'_>,
) -> Result<SpooledFile, ApiError> {
    let path = state
        .config
        .intake_dir
        .join(format!("{job_id}.{extension}"));

    let mut out = tokio::fs::File::create(&path)
        .await
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("intake spool: {e}")))?;

    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                discard(&path).await;
                return Err(ApiError::new(
                    ErrorCode::InvalidRequest,
                    format!("upload interrupted: {err}"),
                ));
            }
        };

        written += chunk.len() as u64;
        if written > state.config.max_upload_bytes {
            discard(&path).await;
            return Err(ApiError::new(
                ErrorCode::PayloadTooLarge,
                format!("upload exceeds {} bytes", state.config.max_upload_bytes),
            ));
        }

        hasher.update(&chunk);
        if let Err(err) = out.write_all(&chunk).await {
            discard(&path).await;
            return Err(ApiError::new(
                ErrorCode::Internal,
                format!("intake spool: {err}"),
            ));
        }
    }

    if let Err(err) = out.flush().await {
        discard(&path).await;
        return Err(ApiError::new(
            ErrorCode::Internal,
            format!("intake spool: {err}"),
        ));
    }

    Ok(SpooledFile {
        path,
        filename,
        sha256_hex: hex::encode(hasher.finalize()),
        len: written,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
