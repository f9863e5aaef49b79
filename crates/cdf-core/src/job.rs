// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job records, lifecycle states, options, and the API-facing view.

use cdf_error::ErrorDto;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Client-supplied export options, all defaulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    /// Raster export resolution.
    pub dpi: u32,
    /// Whether die-cut geometry is additionally exported as vector SVG.
    pub extract_vector: bool,
    /// Whether optional content groups (PDF layers) are honoured.
    pub enable_ocg: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            dpi: crate::DEFAULT_DPI,
            extract_vector: true,
            enable_ocg: false,
        }
    }
}

impl JobOptions {
    /// Canonical JSON used in the upload signature: serde serialization with
    /// fields in declared order and no whitespace, independent of how the
    /// client formatted the options part.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).expect("options serialize")
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the scheduler queue.
    Queued,
    /// A worker is processing the job.
    Running,
    /// The manifest and assets are published.
    Succeeded,
    /// The job failed; `error` on the record says why.
    Failed,
    /// The wall-clock deadline expired.
    TimedOut,
    /// Cancelled by an operator or client.
    Cancelled,
}

impl JobState {
    /// Returns `true` if this state is permanent.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }

    /// Returns the set of states that are valid successors of `self`.
    pub fn valid_transitions(&self) -> &'static [JobState] {
        match self {
            Self::Queued => &[Self::Running, Self::Cancelled],
            Self::Running => &[
                Self::Succeeded,
                Self::Failed,
                Self::TimedOut,
                Self::Cancelled,
            ],
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// The authoritative in-memory record of one job.
///
/// Created by the gateway on a validated upload; mutated only through the
/// registry after that. `result_dir` is set iff the state is `Succeeded`;
/// `error` is set iff the state is `Failed`, `TimedOut`, or `Cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Opaque 128-bit identifier.
    pub id: Uuid,
    /// Original upload filename.
    pub source_filename: String,
    /// Where the spooled upload lives in the intake directory.
    pub source_path: PathBuf,
    /// Upload size in bytes.
    pub source_bytes_len: u64,
    /// When the gateway accepted the upload.
    pub submitted_at: DateTime<Utc>,
    /// Export options.
    pub options: JobOptions,
    /// Current lifecycle state.
    pub state: JobState,
    /// Monotonically non-decreasing progress in `[0, 100]`.
    pub progress: u8,
    /// Set when the job leaves the queue.
    pub started_at: Option<DateTime<Utc>>,
    /// Set on entering a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail; present iff the job did not succeed.
    pub error: Option<ErrorDto>,
    /// Published result directory; present iff the job succeeded.
    pub result_dir: Option<PathBuf>,
}

impl JobRecord {
    /// Create a fresh record in the `Queued` state.
    pub fn new(
        id: Uuid,
        source_filename: impl Into<String>,
        source_path: PathBuf,
        source_bytes_len: u64,
        options: JobOptions,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_filename: source_filename.into(),
            source_path,
            source_bytes_len,
            submitted_at,
            options,
            state: JobState::Queued,
            progress: 0,
            started_at: None,
            completed_at: None,
            error: None,
            result_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// Read-only snapshot of a job returned by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    /// Job identifier.
    pub job_id: Uuid,
    /// Lifecycle state.
    pub status: JobState,
    /// Progress in `[0, 100]`.
    pub progress: u8,
    /// Original upload filename.
    pub source_filename: String,
    /// When the gateway accepted the upload.
    pub submitted_at: DateTime<Utc>,
    /// When a worker picked the job up, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail for unsuccessful terminal states.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDto>,
    /// Advisory operational warning (e.g. low disk on the host).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<&JobRecord> for JobView {
    fn from(rec: &JobRecord) -> Self {
        Self {
            job_id: rec.id,
            status: rec.state,
            progress: rec.progress,
            source_filename: rec.source_filename.clone(),
            submitted_at: rec.submitted_at,
            started_at: rec.started_at,
            completed_at: rec.completed_at,
            error: rec.error.clone(),
            warning: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(
            Uuid::nil(),
            "card.ai",
            PathBuf::from("/intake/card.ai"),
            2048,
            JobOptions::default(),
            Utc::now(),
        )
    }

    #[test]
    fn options_default_dpi() {
        let opts = JobOptions::default();
        assert_eq!(opts.dpi, 600);
        assert!(opts.extract_vector);
        assert!(!opts.enable_ocg);
    }

    #[test]
    fn options_canonical_json_is_stable() {
        let opts = JobOptions::default();
        assert_eq!(
            opts.canonical_json(),
            r#"{"dpi":600,"extractVector":true,"enableOcg":false}"#
        );
    }

    #[test]
    fn options_accept_partial_input() {
        let opts: JobOptions = serde_json::from_str(r#"{"dpi":300}"#).unwrap();
        assert_eq!(opts.dpi, 300);
        assert!(opts.extract_vector);
    }

    #[test]
    fn canonical_json_ignores_client_formatting() {
        let a: JobOptions = serde_json::from_str(r#"{"dpi": 600 , "enableOcg": false}"#).unwrap();
        let b: JobOptions = serde_json::from_str(r#"{"enableOcg":false,"dpi":600}"#).unwrap();
        assert_eq!(a.canonical_json(), b.canonical_json());
    }

    #[test]
    fn queued_transitions() {
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Queued.can_transition_to(JobState::Cancelled));
        assert!(!JobState::Queued.can_transition_to(JobState::Succeeded));
    }

    #[test]
    fn running_transitions() {
        for next in [
            JobState::Succeeded,
            JobState::Failed,
            JobState::TimedOut,
            JobState::Cancelled,
        ] {
            assert!(JobState::Running.can_transition_to(next));
        }
        assert!(!JobState::Running.can_transition_to(JobState::Queued));
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for state in [
            JobState::Succeeded,
            JobState::Failed,
            JobState::TimedOut,
            JobState::Cancelled,
        ] {
            assert!(state.is_terminal());
            assert!(state.valid_transitions().is_empty());
        }
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobState::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }

    #[test]
    fn new_record_is_queued_at_zero() {
        let rec = record();
        assert_eq!(rec.state, JobState::Queued);
        assert_eq!(rec.progress, 0);
        assert!(rec.result_dir.is_none());
        assert!(rec.error.is_none());
    }

    #[test]
    fn view_uses_camel_case() {
        let view = JobView::from(&record());
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("jobId").is_some());
        assert!(json.get("sourceFilename").is_some());
        assert!(json.get("submittedAt").is_some());
        // Absent optionals are omitted entirely.
        assert!(json.get("startedAt").is_none());
        assert!(json.get("error").is_none());
    }
}
