// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the cardflow pipeline.
//!
//! Every pipeline error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag that also fixes the HTTP status it maps to), a human-readable
//! message, an optional cause chain, and arbitrary key-value context.  Use
//! the builder returned by [`PipelineError::new`] to construct errors
//! fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases. Every code maps to
/// exactly one HTTP status (see [`ErrorCode::http_status`]); clients use the
/// status to decide whether a retry is worthwhile and the code for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing fields, path traversal, or a bad extension.
    InvalidRequest,
    /// Missing/invalid API key or signature, or a stale timestamp.
    Unauthorized,
    /// Upload exceeds the configured byte limit.
    PayloadTooLarge,
    /// The scheduler queue is saturated.
    QueueFull,
    /// Unknown job id or asset name.
    NotFound,
    /// Result requested before the job reached a success state.
    NotReady,
    /// The rasterizer exited with a non-zero status.
    RendererFailed,
    /// A required rasterizer output is missing or zero bytes.
    RendererIncomplete,
    /// The job exceeded its wall-clock deadline.
    Timeout,
    /// The job was cancelled by an operator or client.
    Cancelled,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Stable `&'static str` representation (e.g. `"QUEUE_FULL"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::QueueFull => "QUEUE_FULL",
            Self::NotFound => "NOT_FOUND",
            Self::NotReady => "NOT_READY",
            Self::RendererFailed => "RENDERER_FAILED",
            Self::RendererIncomplete => "RENDERER_INCOMPLETE",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// The single HTTP status this code maps to.
    ///
    /// Terminal job failures (`RENDERER_*`, `TIMEOUT`, `CANCELLED`) surface
    /// only on the result endpoint, where the contract is `410 Gone`; the
    /// response body still distinguishes them by code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Unauthorized => 401,
            Self::PayloadTooLarge => 413,
            Self::QueueFull => 429,
            Self::NotFound => 404,
            Self::NotReady => 409,
            Self::RendererFailed
            | Self::RendererIncomplete
            | Self::Timeout
            | Self::Cancelled => 410,
            Self::Internal => 500,
        }
    }

    /// Returns `true` if a client retry of the identical request can
    /// plausibly succeed (transient condition).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull | Self::Timeout)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Unified pipeline error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use cdf_error::{ErrorCode, PipelineError};
///
/// let err = PipelineError::new(ErrorCode::Timeout, "deadline exceeded after 180 s")
///     .with_context("job_id", "8b1e...")
///     .with_context("timeout_secs", 180);
/// ```
pub struct PipelineError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PipelineError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.http_status()`.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("PipelineError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`PipelineError`] (without the opaque source).
///
/// This is the shape stored in job records and written to `failure.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl ErrorDto {
    /// Create a DTO directly from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
            source_message: None,
        }
    }
}

impl From<&PipelineError> for ErrorDto {
    fn from(err: &PipelineError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<ErrorDto> for PipelineError {
    fn from(dto: ErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
