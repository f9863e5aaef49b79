// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process job registry and scheduler.
//!
//! All jobs live in one map keyed by job id, each record behind its own
//! `RwLock` so status polling scales with concurrent jobs. Admission goes
//! through a bounded FIFO queue (`VecDeque` + `Notify`) that supports
//! mid-queue removal for cancellation. Workers pull ids with
//! [`JobRegistry::next_job`]; the number of worker tasks bounds the number
//! of `Running` jobs.
//!
//! Lock order is queue before jobs before record; every multi-lock path in
//! this module takes them in that order.

#![deny(unsafe_code)]

use cdf_core::{JobRecord, JobState, JobView};
use cdf_error::{ErrorCode, ErrorDto};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The waiting queue has reached its capacity.
    #[error("queue is full (capacity {capacity})")]
    QueueFull {
        /// Maximum number of queued jobs.
        capacity: usize,
    },

    /// A job with this id already exists.
    #[error("duplicate job id: {0}")]
    DuplicateId(Uuid),

    /// No job with this id is registered.
    #[error("unknown job id: {0}")]
    UnknownJob(Uuid),

    /// The requested state change violates the lifecycle state machine.
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: JobState,
        /// Rejected successor.
        to: JobState,
    },
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued; it left the queue and is now `Cancelled`.
    Dequeued,
    /// The job is running (or about to); its worker was signalled.
    Signalled,
    /// The job had already reached a terminal state; nothing changed.
    AlreadyTerminal,
    /// No such job.
    NotFound,
}

/// A job evicted by [`JobRegistry::reap`].
#[derive(Debug, Clone)]
pub struct ReapedJob {
    /// The evicted job's id.
    pub id: Uuid,
    /// Its result directory, if it had published one.
    pub result_dir: Option<PathBuf>,
    /// The spooled upload in the intake directory.
    pub source_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct JobEntry {
    record: std::sync::Arc<RwLock<JobRecord>>,
    cancel: CancellationToken,
}

/// The in-process job store and FIFO scheduler.
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    queue: Mutex<VecDeque<Uuid>>,
    notify: Notify,
    queue_capacity: usize,
    ttl: Duration,
    running: AtomicUsize,
}

impl JobRegistry {
    /// Create a registry with the given queue capacity and record TTL.
    pub fn new(queue_capacity: usize, ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            queue_capacity,
            ttl,
            running: AtomicUsize::new(0),
        }
    }

    /// Admit a job: register the record and append its id to the queue.
    ///
    /// When `submit` returns `Ok`, the job is observable as `Queued` by
    /// [`status`](Self::status). Rejects with [`RegistryError::QueueFull`]
    /// when the queue is saturated, leaving no trace of the job.
    pub async fn submit(&self, record: JobRecord) -> Result<(), RegistryError> {
        let id = record.id;
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.queue_capacity {
            return Err(RegistryError::QueueFull {
                capacity: self.queue_capacity,
            });
        }

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        jobs.insert(
            id,
            JobEntry {
                record: std::sync::Arc::new(RwLock::new(record)),
                cancel: CancellationToken::new(),
            },
        );
        queue.push_back(id);
        drop(jobs);
        drop(queue);

        self.notify.notify_one();
        debug!(job_id = %id, "job queued");
        Ok(())
    }

    /// Block until a job id can be pulled from the queue, or `shutdown`
    /// fires. FIFO across all submitters.
    pub async fn next_job(&self, shutdown: &CancellationToken) -> Option<Uuid> {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(id) = queue.pop_front() {
                    return Some(id);
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Snapshot of a job's record.
    pub async fn snapshot(&self, id: Uuid) -> Option<JobRecord> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&id)?;
        Some(entry.record.read().await.clone())
    }

    /// Read-only status view of a job.
    pub async fn status(&self, id: Uuid) -> Option<JobView> {
        self.snapshot(id).await.map(|rec| JobView::from(&rec))
    }

    /// The cancellation token attached to a job.
    pub async fn cancel_token(&self, id: Uuid) -> Option<CancellationToken> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).map(|e| e.cancel.clone())
    }

    // -- Transitions (the sole writes after creation) -----------------------

    async fn with_record<F, T>(&self, id: Uuid, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut JobRecord) -> Result<T, RegistryError>,
    {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&id).ok_or(RegistryError::UnknownJob(id))?;
        let mut record = entry.record.write().await;
        f(&mut record)
    }

    fn check_transition(record: &JobRecord, to: JobState) -> Result<(), RegistryError> {
        if record.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(RegistryError::InvalidTransition {
                from: record.state,
                to,
            })
        }
    }

    /// `Queued → Running`; stamps `started_at`.
    pub async fn mark_running(&self, id: Uuid) -> Result<(), RegistryError> {
        let result = self
            .with_record(id, |rec| {
                Self::check_transition(rec, JobState::Running)?;
                rec.state = JobState::Running;
                rec.started_at = Some(Utc::now());
                Ok(())
            })
            .await;
        if result.is_ok() {
            self.running.fetch_add(1, Ordering::SeqCst);
            info!(job_id = %id, "job running");
        }
        result
    }

    /// `Running → Succeeded`; publishes the result directory.
    pub async fn mark_succeeded(&self, id: Uuid, result_dir: PathBuf) -> Result<(), RegistryError> {
        let result = self
            .with_record(id, |rec| {
                Self::check_transition(rec, JobState::Succeeded)?;
                rec.state = JobState::Succeeded;
                rec.progress = 100;
                rec.completed_at = Some(Utc::now());
                rec.result_dir = Some(result_dir);
                Ok(())
            })
            .await;
        if result.is_ok() {
            self.running.fetch_sub(1, Ordering::SeqCst);
            info!(job_id = %id, "job succeeded");
        }
        result
    }

    /// `Running → Failed` (or `TimedOut` when the error is a timeout).
    pub async fn mark_failed(&self, id: Uuid, error: ErrorDto) -> Result<(), RegistryError> {
        let to = if error.code == ErrorCode::Timeout {
            JobState::TimedOut
        } else {
            JobState::Failed
        };
        let result = self
            .with_record(id, |rec| {
                Self::check_transition(rec, to)?;
                rec.state = to;
                rec.completed_at = Some(Utc::now());
                rec.error = Some(error);
                Ok(())
            })
            .await;
        if result.is_ok() {
            self.running.fetch_sub(1, Ordering::SeqCst);
            info!(job_id = %id, state = ?to, "job failed");
        }
        result
    }

    /// `Queued|Running → Cancelled`.
    pub async fn mark_cancelled(&self, id: Uuid) -> Result<(), RegistryError> {
        let mut was_running = false;
        let result = self
            .with_record(id, |rec| {
                Self::check_transition(rec, JobState::Cancelled)?;
                was_running = rec.state == JobState::Running;
                rec.state = JobState::Cancelled;
                rec.completed_at = Some(Utc::now());
                rec.error = Some(ErrorDto::new(ErrorCode::Cancelled, "job cancelled"));
                Ok(())
            })
            .await;
        if result.is_ok() {
            if was_running {
                self.running.fetch_sub(1, Ordering::SeqCst);
            }
            info!(job_id = %id, "job cancelled");
        }
        result
    }

    /// Raise a running job's progress. Lower values are ignored so progress
    /// is monotonically non-decreasing; values above 100 are clamped.
    pub async fn set_progress(&self, id: Uuid, progress: u8) -> Result<(), RegistryError> {
        self.with_record(id, |rec| {
            if rec.state == JobState::Running && progress > rec.progress {
                rec.progress = progress.min(100);
            }
            Ok(())
        })
        .await
    }

    // -- Cancellation -------------------------------------------------------

    /// Cancel a job.
    ///
    /// A queued job leaves the queue atomically and becomes `Cancelled`; a
    /// running job has its token fired for the worker to observe. Terminal
    /// jobs are untouched.
    pub async fn cancel(&self, id: Uuid) -> CancelOutcome {
        let mut queue = self.queue.lock().await;
        let jobs = self.jobs.read().await;
        let Some(entry) = jobs.get(&id) else {
            return CancelOutcome::NotFound;
        };
        let mut record = entry.record.write().await;

        match record.state {
            JobState::Queued => {
                entry.cancel.cancel();
                if let Some(pos) = queue.iter().position(|q| *q == id) {
                    queue.remove(pos);
                    record.state = JobState::Cancelled;
                    record.completed_at = Some(Utc::now());
                    record.error = Some(ErrorDto::new(ErrorCode::Cancelled, "job cancelled"));
                    info!(job_id = %id, "queued job cancelled");
                    CancelOutcome::Dequeued
                } else {
                    // Already popped by a worker that has not yet marked it
                    // running; the worker observes the token and finishes
                    // the transition.
                    CancelOutcome::Signalled
                }
            }
            JobState::Running => {
                entry.cancel.cancel();
                CancelOutcome::Signalled
            }
            _ => CancelOutcome::AlreadyTerminal,
        }
    }

    // -- Reaping ------------------------------------------------------------

    /// Evict every terminal job whose `completed_at + TTL` lies before
    /// `now`, returning what was removed so the caller can delete result
    /// directories.
    pub async fn reap(&self, now: DateTime<Utc>) -> Vec<ReapedJob> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::MAX);
        let mut jobs = self.jobs.write().await;

        let mut expired = Vec::new();
        for (id, entry) in jobs.iter() {
            let record = entry.record.read().await;
            if !record.state.is_terminal() {
                continue;
            }
            if let Some(completed) = record.completed_at {
                if completed + ttl < now {
                    expired.push((*id, record.result_dir.clone(), record.source_path.clone()));
                }
            }
        }

        let mut reaped = Vec::with_capacity(expired.len());
        for (id, result_dir, source_path) in expired {
            jobs.remove(&id);
            debug!(job_id = %id, "job reaped");
            reaped.push(ReapedJob {
                id,
                result_dir,
                source_path,
            });
        }
        reaped
    }

    // -- Introspection ------------------------------------------------------

    /// Number of jobs waiting in the queue.
    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Configured queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Number of jobs currently `Running`.
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of registered jobs (any state).
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cdf_core::JobOptions;

    fn record(id: Uuid) -> JobRecord {
        JobRecord::new(
            id,
            "card.ai",
            PathBuf::from("/intake/card.ai"),
            1024,
            JobOptions::default(),
            Utc::now(),
        )
    }

    fn registry(capacity: usize) -> JobRegistry {
        JobRegistry::new(capacity, Duration::from_secs(86_400))
    }

    #[tokio::test]
    async fn submit_makes_job_observable_as_queued() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();

        let view = reg.status(id).await.unwrap();
        assert_eq!(view.status, JobState::Queued);
        assert_eq!(view.progress, 0);
        assert_eq!(reg.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn queue_full_rejects_without_registering() {
        let reg = registry(1);
        reg.submit(record(Uuid::new_v4())).await.unwrap();

        let rejected = Uuid::new_v4();
        let err = reg.submit(record(rejected)).await.unwrap_err();
        assert!(matches!(err, RegistryError::QueueFull { capacity: 1 }));
        // No ghost record of the rejected job.
        assert!(reg.status(rejected).await.is_none());
        assert_eq!(reg.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();
        let err = reg.submit(record(id)).await.unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(d) if d == id));
    }

    #[tokio::test]
    async fn next_job_is_fifo() {
        let reg = registry(8);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        reg.submit(record(first)).await.unwrap();
        reg.submit(record(second)).await.unwrap();

        let shutdown = CancellationToken::new();
        assert_eq!(reg.next_job(&shutdown).await, Some(first));
        assert_eq!(reg.next_job(&shutdown).await, Some(second));
    }

    #[tokio::test]
    async fn next_job_wakes_on_submit() {
        let reg = std::sync::Arc::new(registry(4));
        let shutdown = CancellationToken::new();

        let waiter = {
            let reg = reg.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { reg.next_job(&shutdown).await })
        };

        // Give the waiter a chance to park before submitting.
        tokio::task::yield_now().await;
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(id));
    }

    #[tokio::test]
    async fn next_job_returns_none_on_shutdown() {
        let reg = registry(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(reg.next_job(&shutdown).await, None);
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();

        reg.mark_running(id).await.unwrap();
        assert_eq!(reg.running_count(), 1);
        let view = reg.status(id).await.unwrap();
        assert_eq!(view.status, JobState::Running);
        assert!(view.started_at.is_some());

        reg.mark_succeeded(id, PathBuf::from("/results/x")).await.unwrap();
        assert_eq!(reg.running_count(), 0);
        let rec = reg.snapshot(id).await.unwrap();
        assert_eq!(rec.state, JobState::Succeeded);
        assert_eq!(rec.progress, 100);
        assert!(rec.completed_at.is_some());
        assert_eq!(rec.result_dir.as_deref(), Some(std::path::Path::new("/results/x")));
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();

        // Queued cannot jump straight to Succeeded.
        let err = reg
            .mark_succeeded(id, PathBuf::from("/results/x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::InvalidTransition {
                from: JobState::Queued,
                to: JobState::Succeeded
            }
        ));
    }

    #[tokio::test]
    async fn terminal_state_is_permanent() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();
        reg.mark_running(id).await.unwrap();
        reg.mark_failed(id, ErrorDto::new(ErrorCode::RendererFailed, "exit 2"))
            .await
            .unwrap();

        assert!(reg.mark_running(id).await.is_err());
        assert!(reg.mark_cancelled(id).await.is_err());
        let rec = reg.snapshot(id).await.unwrap();
        assert_eq!(rec.state, JobState::Failed);
        assert_eq!(rec.error.as_ref().unwrap().code, ErrorCode::RendererFailed);
    }

    #[tokio::test]
    async fn timeout_error_lands_in_timed_out() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();
        reg.mark_running(id).await.unwrap();
        reg.mark_failed(id, ErrorDto::new(ErrorCode::Timeout, "deadline"))
            .await
            .unwrap();
        let rec = reg.snapshot(id).await.unwrap();
        assert_eq!(rec.state, JobState::TimedOut);
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_running_only() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();

        // Ignored while queued.
        reg.set_progress(id, 50).await.unwrap();
        assert_eq!(reg.status(id).await.unwrap().progress, 0);

        reg.mark_running(id).await.unwrap();
        reg.set_progress(id, 40).await.unwrap();
        reg.set_progress(id, 20).await.unwrap();
        assert_eq!(reg.status(id).await.unwrap().progress, 40);
    }

    #[tokio::test]
    async fn cancel_queued_removes_from_queue() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();
        assert_eq!(reg.queue_depth().await, 1);

        assert_eq!(reg.cancel(id).await, CancelOutcome::Dequeued);
        assert_eq!(reg.queue_depth().await, 0);
        let rec = reg.snapshot(id).await.unwrap();
        assert_eq!(rec.state, JobState::Cancelled);
        assert_eq!(rec.error.as_ref().unwrap().code, ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn cancel_running_signals_token() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();
        let shutdown = CancellationToken::new();
        reg.next_job(&shutdown).await.unwrap();
        reg.mark_running(id).await.unwrap();

        let token = reg.cancel_token(id).await.unwrap();
        assert!(!token.is_cancelled());
        assert_eq!(reg.cancel(id).await, CancelOutcome::Signalled);
        assert!(token.is_cancelled());
        // Still running until the worker observes the token.
        assert_eq!(reg.status(id).await.unwrap().status, JobState::Running);
    }

    #[tokio::test]
    async fn cancel_terminal_is_noop() {
        let reg = registry(4);
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();
        reg.mark_running(id).await.unwrap();
        reg.mark_succeeded(id, PathBuf::from("/r")).await.unwrap();
        assert_eq!(reg.cancel(id).await, CancelOutcome::AlreadyTerminal);
        assert_eq!(reg.status(id).await.unwrap().status, JobState::Succeeded);
    }

    #[tokio::test]
    async fn cancel_unknown_is_not_found() {
        let reg = registry(4);
        assert_eq!(reg.cancel(Uuid::new_v4()).await, CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn reap_evicts_only_expired_terminal_jobs() {
        let reg = JobRegistry::new(8, Duration::from_secs(0));
        let done = Uuid::new_v4();
        let live = Uuid::new_v4();
        reg.submit(record(done)).await.unwrap();
        reg.submit(record(live)).await.unwrap();
        reg.mark_running(done).await.unwrap();
        reg.mark_succeeded(done, PathBuf::from("/results/done")).await.unwrap();

        let reaped = reg.reap(Utc::now() + chrono::Duration::seconds(5)).await;
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].id, done);
        assert_eq!(
            reaped[0].result_dir.as_deref(),
            Some(std::path::Path::new("/results/done"))
        );

        // Reachable until reaped, gone after.
        assert!(reg.status(done).await.is_none());
        assert!(reg.status(live).await.is_some());
    }

    #[tokio::test]
    async fn reap_respects_ttl() {
        let reg = JobRegistry::new(8, Duration::from_secs(3600));
        let id = Uuid::new_v4();
        reg.submit(record(id)).await.unwrap();
        reg.mark_running(id).await.unwrap();
        reg.mark_succeeded(id, PathBuf::from("/r")).await.unwrap();

        let reaped = reg.reap(Utc::now()).await;
        assert!(reaped.is_empty());
        assert!(reg.status(id).await.is_some());
    }
}
