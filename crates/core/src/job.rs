//! The process-wide job slot.
//!
//! Exactly one [`Job`] exists for the life of the process. [`JobSlot`] is the
//! only way to mutate it: admission goes through [`JobSlot::try_acquire`],
//! which hands out a [`JobLease`], and the lease is the only thing that can
//! move the job out of `Running`. A lease that is dropped without being
//! completed records a failure, so the slot can never stay stuck in
//! `Running` once the task holding the lease ends.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Phase of the single tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// No job has run since the process started.
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    /// Label reported by the status endpoint.
    ///
    /// Clients match on these exact strings, including the historical
    /// spelling of `idle_succes`. A process that never ran a job reports
    /// `idle_fail` since there is no successful result to show.
    pub fn status_label(self) -> &'static str {
        match self {
            JobPhase::Running => "running",
            JobPhase::Succeeded => "idle_succes",
            JobPhase::Idle | JobPhase::Failed => "idle_fail",
        }
    }
}

/// Final result reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The computation produced a result file at the given path.
    Succeeded(PathBuf),
    Failed,
}

#[derive(Debug)]
struct Job {
    phase: JobPhase,
    input: Option<PathBuf>,
    result: Option<PathBuf>,
    /// Incremented on every admission.
    generation: u64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for Job {
    fn default() -> Self {
        Self {
            phase: JobPhase::Idle,
            input: None,
            result: None,
            generation: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Point-in-time copy of the job state.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub phase: JobPhase,
    /// Staged input, only while `Running`.
    pub input: Option<PathBuf>,
    /// Produced artifact, only when `Succeeded`.
    pub result: Option<PathBuf>,
    pub generation: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Single-job concurrency gate plus the last known outcome.
///
/// Cheap to clone; all clones share the same job.
#[derive(Debug, Clone, Default)]
pub struct JobSlot {
    inner: Arc<Mutex<Job>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new job if none is running.
    ///
    /// Returns `None` without touching the job when one is already running.
    /// Otherwise the previous outcome is discarded, the job moves to
    /// `Running` and the returned lease is the sole handle able to finish it.
    pub fn try_acquire(&self) -> Option<JobLease> {
        let mut job = self.lock();
        if job.phase == JobPhase::Running {
            return None;
        }

        // The previous outcome does not carry into the next cycle.
        job.input = None;
        job.result = None;
        job.finished_at = None;

        job.generation += 1;
        job.phase = JobPhase::Running;
        job.started_at = Some(Utc::now());

        tracing::debug!(generation = job.generation, "Job slot acquired");

        Some(JobLease {
            slot: self.clone(),
            generation: job.generation,
            completed: false,
        })
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let job = self.lock();
        JobSnapshot {
            phase: job.phase,
            input: job.input.clone(),
            result: job.result.clone(),
            generation: job.generation,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.lock().phase
    }

    fn attach_input(&self, generation: u64, path: PathBuf) {
        let mut job = self.lock();
        if job.phase == JobPhase::Running && job.generation == generation {
            job.input = Some(path);
        }
    }

    fn complete(&self, generation: u64, outcome: JobOutcome) {
        let mut job = self.lock();
        if job.phase != JobPhase::Running || job.generation != generation {
            tracing::warn!(
                generation,
                current_generation = job.generation,
                phase = ?job.phase,
                "Ignoring completion for a job that is not running",
            );
            return;
        }

        job.input = None;
        job.finished_at = Some(Utc::now());
        match outcome {
            JobOutcome::Succeeded(path) => {
                job.phase = JobPhase::Succeeded;
                job.result = Some(path);
            }
            JobOutcome::Failed => {
                job.phase = JobPhase::Failed;
                job.result = None;
            }
        }

        tracing::debug!(generation, phase = ?job.phase, "Job slot completed");
    }

    fn lock(&self) -> MutexGuard<'_, Job> {
        // The critical sections never panic midway through an update, so a
        // poisoned lock still guards a consistent job.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive right to finish the job admitted by [`JobSlot::try_acquire`].
///
/// Consumed by [`JobLease::complete`]. Dropping an uncompleted lease
/// (early return, error or panic in the owning task) completes the job as
/// failed.
#[derive(Debug)]
#[must_use = "dropping a lease immediately fails the admitted job"]
pub struct JobLease {
    slot: JobSlot,
    generation: u64,
    completed: bool,
}

impl JobLease {
    /// Admission counter of this job, used for log correlation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record the staged input artifact for this job.
    pub fn attach_input(&self, path: PathBuf) {
        self.slot.attach_input(self.generation, path);
    }

    /// Move the job to its terminal phase.
    pub fn complete(mut self, outcome: JobOutcome) {
        self.completed = true;
        self.slot.complete(self.generation, outcome);
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(
                generation = self.generation,
                "Job lease dropped without completion, marking job as failed",
            );
            self.slot.complete(self.generation, JobOutcome::Failed);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
