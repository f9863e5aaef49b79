// SPDX-License-Identifier: MIT OR Apache-2.0
//! Renderer driver: process supervision for the external rasterizer.
//!
//! The rasterizer is a black box spoken to through files: the driver writes
//! a JSON descriptor into the job's output directory, spawns the agent with
//! the descriptor path as its final argument, and waits for it to exit.
//! Completion is signalled by `{job_id}_done.txt`, failure by
//! `{job_id}_error.json`. Two invocations exist: **probe** (extract the
//! document tree) and **render** (produce the planned asset files).
//!
//! The driver never enforces a deadline itself; callers wrap invocations in
//! a timeout and rely on `kill_on_drop` so an abandoned wait also reaps the
//! subprocess.

#![deny(unsafe_code)]

use async_trait::async_trait;
use cdf_core::{Diagnostics, Document};
use cdf_error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// Configuration for spawning the rasterizer process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterizerSpec {
    /// Executable command to run.
    pub command: String,
    /// Arguments passed before the descriptor path.
    pub args: Vec<String>,
    /// Environment variables set for the process.
    pub env: BTreeMap<String, String>,
    /// Working directory for the process.
    pub cwd: Option<PathBuf>,
}

impl RasterizerSpec {
    /// Create a spec with the given command and default (empty) args/env.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Descriptor for a probe invocation: the agent writes `{job_id}_tree.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeDescriptor {
    /// Job identifier, also the marker-file prefix.
    pub job_id: String,
    /// Absolute path of the source file.
    pub input: PathBuf,
    /// Absolute output directory.
    pub output: PathBuf,
}

/// One card's worth of work in a render descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorCard {
    /// Filename prefix shared by this card's assets.
    pub card_prefix: String,
    /// Crop rectangle in points, `[left, top, right, bottom]`.
    pub crop_pt: [f64; 4],
    /// Asset tokens to produce (`albedo`, `foil`, `foil_color`, `uv`,
    /// `emboss`, `diecut`).
    pub produce: Vec<String>,
}

/// Descriptor for a render invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderDescriptor {
    /// Job identifier, also the marker-file prefix.
    pub job_id: String,
    /// Absolute path of the source file.
    pub input: PathBuf,
    /// Absolute output directory.
    pub output: PathBuf,
    /// Per-card work list.
    pub plan: Vec<DescriptorCard>,
}

/// Shape of `{job_id}_error.json` written by a failing agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentError {
    /// Machine-readable agent error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from rasterizer process management and protocol handling.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The agent binary could not be spawned.
    #[error("failed to spawn rasterizer: {0}")]
    Spawn(#[source] std::io::Error),

    /// Descriptor or marker-file I/O failed.
    #[error("rasterizer protocol i/o: {0}")]
    Io(#[from] std::io::Error),

    /// A descriptor or agent-written JSON file could not be (de)serialized.
    #[error("rasterizer protocol json: {0}")]
    Json(#[from] serde_json::Error),

    /// The agent reported failure through its error file.
    #[error("rasterizer failed ({code}): {message}")]
    Agent {
        /// Agent-reported code.
        code: String,
        /// Agent-reported message.
        message: String,
    },

    /// The agent exited with a non-zero status and no error file.
    #[error("rasterizer exited with status {code:?}")]
    NonZeroExit {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// The agent exited zero but never wrote its completion marker.
    #[error("rasterizer exited without a completion marker")]
    MissingDone,

    /// Expected outputs are missing or empty.
    #[error("rasterizer outputs missing or empty: {missing:?}")]
    Incomplete {
        /// Names of the missing or zero-byte files.
        missing: Vec<String>,
    },
}

impl RenderError {
    /// The pipeline error code this maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Incomplete { .. } => ErrorCode::RendererIncomplete,
            Self::Agent { .. } | Self::NonZeroExit { .. } | Self::MissingDone => {
                ErrorCode::RendererFailed
            }
            Self::Spawn(_) | Self::Io(_) | Self::Json(_) => ErrorCode::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait seam
// ---------------------------------------------------------------------------

/// The driver seam the worker programs against; production uses
/// [`CommandRasterizer`], tests substitute an in-memory fake.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Extract the document tree from `input`, staging protocol files under
    /// `output`.
    async fn probe(
        &self,
        job_id: Uuid,
        input: &Path,
        output: &Path,
    ) -> Result<Document, RenderError>;

    /// Produce every file in `expected` (relative names under the
    /// descriptor's output directory).
    async fn render(
        &self,
        descriptor: &RenderDescriptor,
        expected: &[String],
    ) -> Result<Option<Diagnostics>, RenderError>;
}

// ---------------------------------------------------------------------------
// Command-backed implementation
// ---------------------------------------------------------------------------

/// Drives the real rasterizer subprocess.
#[derive(Debug, Clone)]
pub struct CommandRasterizer {
    /// Spawn configuration.
    pub spec: RasterizerSpec,
}

impl CommandRasterizer {
    /// Create a driver from a spawn spec.
    pub fn new(spec: RasterizerSpec) -> Self {
        Self { spec }
    }

    async fn run_once(&self, descriptor_path: &Path, output: &Path, job_id: &str) -> Result<(), RenderError> {
        // Stale markers from a previous invocation of the same job must not
        // satisfy this one's completion check.
        remove_if_present(&marker_path(output, job_id, "done.txt")).await?;
        remove_if_present(&marker_path(output, job_id, "error.json")).await?;

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args)
            .arg(descriptor_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (k, v) in &self.spec.env {
            cmd.env(k, v);
        }
        if let Some(cwd) = &self.spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(RenderError::Spawn)?;
        let status = child.wait().await?;

        // An agent that manages to write its error file is the better
        // diagnostic regardless of the exit status.
        let error_path = marker_path(output, job_id, "error.json");
        if fs::try_exists(&error_path).await.unwrap_or(false) {
            let raw = fs::read(&error_path).await?;
            let agent: AgentError = serde_json::from_slice(&raw)?;
            return Err(RenderError::Agent {
                code: agent.code,
                message: agent.message,
            });
        }

        if !status.success() {
            return Err(RenderError::NonZeroExit {
                code: status.code(),
            });
        }

        let done_path = marker_path(output, job_id, "done.txt");
        if !fs::try_exists(&done_path).await.unwrap_or(false) {
            return Err(RenderError::MissingDone);
        }

        Ok(())
    }
}

#[async_trait]
impl Rasterizer for CommandRasterizer {
    async fn probe(
        &self,
        job_id: Uuid,
        input: &Path,
        output: &Path,
    ) -> Result<Document, RenderError> {
        let job = job_id.to_string();
        let descriptor = ProbeDescriptor {
            job_id: job.clone(),
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        };
        let descriptor_path = output.join("probe.descriptor");
        fs::write(&descriptor_path, serde_json::to_vec_pretty(&descriptor)?).await?;

        debug!(job_id = %job, command = %self.spec.command, "probing document");
        self.run_once(&descriptor_path, output, &job).await?;

        let tree_path = output.join(format!("{job}_tree.json"));
        let raw = fs::read(&tree_path).await.map_err(|e| {
            warn!(job_id = %job, "probe completed without a tree file");
            RenderError::Io(e)
        })?;
        let doc: Document = serde_json::from_slice(&raw)?;
        Ok(doc)
    }

    async fn render(
        &self,
        descriptor: &RenderDescriptor,
        expected: &[String],
    ) -> Result<Option<Diagnostics>, RenderError> {
        let descriptor_path = descriptor.output.join("job.descriptor");
        fs::write(&descriptor_path, serde_json::to_vec_pretty(descriptor)?).await?;

        debug!(
            job_id = %descriptor.job_id,
            cards = descriptor.plan.len(),
            outputs = expected.len(),
            "rendering assets"
        );
        self.run_once(&descriptor_path, &descriptor.output, &descriptor.job_id)
            .await?;

        verify_outputs(&descriptor.output, expected).await?;

        let diag_path = descriptor.output.join("diagnostics.json");
        if fs::try_exists(&diag_path).await.unwrap_or(false) {
            let raw = fs::read(&diag_path).await?;
            match serde_json::from_slice::<Diagnostics>(&raw) {
                Ok(diag) => return Ok(Some(diag)),
                Err(err) => {
                    // Advisory only; a malformed diagnostics file must not
                    // fail an otherwise complete render.
                    warn!(job_id = %descriptor.job_id, error = %err, "unreadable agent diagnostics");
                }
            }
        }
        Ok(None)
    }
}

/// Assert every expected output exists with non-zero length.
pub async fn verify_outputs(output: &Path, expected: &[String]) -> Result<(), RenderError> {
    let mut missing = Vec::new();
    for name in expected {
        match fs::metadata(output.join(name)).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => missing.push(name.clone()),
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RenderError::Incomplete { missing })
    }
}

fn marker_path(output: &Path, job_id: &str, suffix: &str) -> PathBuf {
    output.join(format!("{job_id}_{suffix}"))
}

async fn remove_if_present(path: &Path) -> Result<(), RenderError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RenderError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_codes() {
        let incomplete = RenderError::Incomplete {
            missing: vec!["x.png".into()],
        };
        assert_eq!(incomplete.code(), ErrorCode::RendererIncomplete);

        let agent = RenderError::Agent {
            code: "E_FONT".into(),
            message: "missing font".into(),
        };
        assert_eq!(agent.code(), ErrorCode::RendererFailed);

        let exit = RenderError::NonZeroExit { code: Some(2) };
        assert_eq!(exit.code(), ErrorCode::RendererFailed);

        let spawn = RenderError::Spawn(std::io::Error::other("no such binary"));
        assert_eq!(spawn.code(), ErrorCode::Internal);
    }

    #[test]
    fn descriptor_serialization_shape() {
        let descriptor = RenderDescriptor {
            job_id: "abc".into(),
            input: PathBuf::from("/intake/card.ai"),
            output: PathBuf::from("/results/abc"),
            plan: vec![DescriptorCard {
                card_prefix: "front_layer_0".into(),
                crop_pt: [0.0, 0.0, 252.0, 144.0],
                produce: vec!["albedo".into(), "foil".into()],
            }],
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["job_id"], "abc");
        assert_eq!(json["plan"][0]["card_prefix"], "front_layer_0");
        assert_eq!(json["plan"][0]["crop_pt"][2], 252.0);
        assert_eq!(json["plan"][0]["produce"][1], "foil");
    }
}
