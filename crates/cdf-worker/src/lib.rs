// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job worker: owns one job end-to-end.
//!
//! A worker is a long-lived task pulling job ids from the registry queue.
//! For each job it creates the result directory, runs probe → classify →
//! plan → render → assemble synchronously, writes the manifest, and reports
//! the terminal state back to the registry. The number of spawned workers
//! bounds the number of `Running` jobs; each worker drives at most one
//! rasterizer invocation at a time (the rasterizer is not assumed
//! re-entrant).
//!
//! Cancellation and the wall-clock deadline race the phase pipeline in a
//! `select`; dropping the in-flight future reaps any live rasterizer child
//! via `kill_on_drop`, so no orphan processes survive either path.

#![deny(unsafe_code)]

use cdf_core::{Document, JobRecord};
use cdf_error::{ErrorCode, ErrorDto};
use cdf_manifest::{assemble, AssembleInput, MANIFEST_FILENAME};
use cdf_registry::JobRegistry;
use cdf_render::{DescriptorCard, Rasterizer, RenderDescriptor};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Filename of the diagnostic written for failed and timed-out jobs.
pub const FAILURE_FILENAME: &str = "failure.json";

/// Worker-level settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root under which each job gets its own result subdirectory.
    pub result_root: PathBuf,
    /// Wall-clock deadline per job.
    pub job_timeout: Duration,
}

/// Diagnostic shape written to [`FAILURE_FILENAME`].
#[derive(Debug, Serialize)]
struct FailureReport<'a> {
    job_id: Uuid,
    failed_at: DateTime<Utc>,
    error: &'a ErrorDto,
}

/// One worker task.
pub struct Worker {
    id: usize,
    registry: Arc<JobRegistry>,
    rasterizer: Arc<dyn Rasterizer>,
    config: WorkerConfig,
}

impl Worker {
    /// Create a worker. `id` only labels log lines.
    pub fn new(
        id: usize,
        registry: Arc<JobRegistry>,
        rasterizer: Arc<dyn Rasterizer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id,
            registry,
            rasterizer,
            config,
        }
    }

    /// Pull and process jobs until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(worker = self.id, "worker started");
        while let Some(job_id) = self.registry.next_job(&shutdown).await {
            self.process(job_id).await;
        }
        info!(worker = self.id, "worker stopped");
    }

    /// Drive one job to a terminal state.
    pub async fn process(&self, job_id: Uuid) {
        let Some(cancel) = self.registry.cancel_token(job_id).await else {
            warn!(worker = self.id, job_id = %job_id, "dequeued job no longer registered");
            return;
        };

        // Cancelled after dequeue but before we got here.
        if cancel.is_cancelled() {
            let _ = self.registry.mark_cancelled(job_id).await;
            return;
        }

        if let Err(err) = self.registry.mark_running(job_id).await {
            warn!(worker = self.id, job_id = %job_id, error = %err, "job not runnable");
            return;
        }

        let Some(record) = self.registry.snapshot(job_id).await else {
            return;
        };

        let result_dir = self.config.result_root.join(job_id.to_string());
        if let Err(err) = tokio::fs::create_dir_all(&result_dir).await {
            error!(worker = self.id, job_id = %job_id, error = %err, "cannot create result dir");
            let dto = ErrorDto::new(ErrorCode::Internal, "cannot create result directory");
            let _ = self.registry.mark_failed(job_id, dto).await;
            return;
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Outcome::Cancelled,
            phases = tokio::time::timeout(
                self.config.job_timeout,
                self.run_phases(&record, &result_dir),
            ) => match phases {
                Ok(Ok(())) => Outcome::Succeeded,
                Ok(Err(dto)) => Outcome::Failed(dto),
                Err(_) => Outcome::Failed(
                    ErrorDto::new(
                        ErrorCode::Timeout,
                        format!(
                            "job exceeded its {} s deadline",
                            self.config.job_timeout.as_secs()
                        ),
                    ),
                ),
            },
        };

        match outcome {
            Outcome::Succeeded => {
                if let Err(err) = self.registry.mark_succeeded(job_id, result_dir).await {
                    error!(worker = self.id, job_id = %job_id, error = %err, "publish failed");
                }
            }
            Outcome::Failed(dto) => {
                self.write_failure(job_id, &result_dir, &dto).await;
                purge_dir_keep_failure(&result_dir).await;
                let _ = self.registry.mark_failed(job_id, dto).await;
            }
            Outcome::Cancelled => {
                debug!(worker = self.id, job_id = %job_id, "cancellation observed");
                if let Err(err) = tokio::fs::remove_dir_all(&result_dir).await {
                    warn!(job_id = %job_id, error = %err, "partial result dir not removed");
                }
                let _ = self.registry.mark_cancelled(job_id).await;
            }
        }
    }

    /// The phase pipeline. Progress checkpoints: 0–15 ingest, 15–55
    /// classify + plan, 55–90 render, 90–98 assemble, 98–100 publish.
    async fn run_phases(&self, record: &JobRecord, result_dir: &Path) -> Result<(), ErrorDto> {
        let job_id = record.id;

        self.registry.set_progress(job_id, 5).await.ok();
        let doc: Document = self
            .rasterizer
            .probe(job_id, &record.source_path, result_dir)
            .await
            .map_err(|e| render_dto(&e))?;
        self.registry.set_progress(job_id, 15).await.ok();

        let buckets = cdf_classify::classify(&doc);
        self.registry.set_progress(job_id, 35).await.ok();
        let export = cdf_plan::plan(&buckets, &doc.artboards);
        self.registry.set_progress(job_id, 55).await.ok();
        debug!(
            job_id = %job_id,
            buckets = buckets.len(),
            cards = export.cards.len(),
            "classified and planned"
        );

        let descriptor = RenderDescriptor {
            job_id: job_id.to_string(),
            input: record.source_path.clone(),
            output: result_dir.to_path_buf(),
            plan: export
                .cards
                .iter()
                .map(|card| DescriptorCard {
                    card_prefix: card.prefix.clone(),
                    crop_pt: card.crop_pt,
                    produce: card
                        .produce_tokens()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                })
                .collect(),
        };
        let expected = export.expected_outputs();
        let diagnostics = self
            .rasterizer
            .render(&descriptor, &expected)
            .await
            .map_err(|e| render_dto(&e))?;
        if let Some(diag) = diagnostics {
            debug!(job_id = %job_id, agent_diagnostics = ?diag, "agent diagnostics received");
        }
        self.registry.set_progress(job_id, 90).await.ok();

        let manifest = assemble(&AssembleInput {
            job_id,
            doc: &doc,
            buckets: &buckets,
            plan: &export,
            result_dir,
            dpi: record.options.dpi,
        })
        .map_err(|e| {
            ErrorDto::new(e.code(), e.to_string())
        })?;

        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ErrorDto::new(ErrorCode::Internal, format!("manifest encode: {e}")))?;
        tokio::fs::write(result_dir.join(MANIFEST_FILENAME), bytes)
            .await
            .map_err(|e| ErrorDto::new(ErrorCode::Internal, format!("manifest write: {e}")))?;
        self.registry.set_progress(job_id, 98).await.ok();

        Ok(())
    }

    async fn write_failure(&self, job_id: Uuid, result_dir: &Path, error: &ErrorDto) {
        let report = FailureReport {
            job_id,
            failed_at: Utc::now(),
            error,
        };
        match serde_json::to_vec_pretty(&report) {
            Ok(bytes) => {
                if let Err(err) =
                    tokio::fs::write(result_dir.join(FAILURE_FILENAME), bytes).await
                {
                    warn!(job_id = %job_id, error = %err, "failure diagnostic not written");
                }
            }
            Err(err) => warn!(job_id = %job_id, error = %err, "failure diagnostic not encoded"),
        }
    }
}

enum Outcome {
    Succeeded,
    Failed(ErrorDto),
    Cancelled,
}

fn render_dto(err: &cdf_render::RenderError) -> ErrorDto {
    ErrorDto::new(err.code(), err.to_string())
}

/// Remove every produced file from a failed job's result directory, keeping
/// only the failure diagnostic.
async fn purge_dir_keep_failure(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name() == FAILURE_FILENAME {
            continue;
        }
        let path = entry.path();
        let removed = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(err) = removed {
            warn!(path = %path.display(), error = %err, "partial output not removed");
        }
    }
}
