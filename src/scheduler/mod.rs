//! Bounded-concurrency batch scheduler.
//!
//! Runs a batch of [`TransferJob`]s with at most `max_concurrency` in flight.
//! Slots are a semaphore: a waiting job starts the moment any running job
//! releases its permit.
//!
//! # Cursor rule
//!
//! After a batch, the resume cursor is the highest job id such that every job
//! with an id at or below it completed (downloaded or skipped). A failure
//! anywhere caps the cursor below the failed id, so a restart revisits it.
//!
//! # Failure rule
//!
//! The first failed job halts submission. Jobs already running finish and are
//! reported; jobs never submitted stay `Pending`.

mod engine;
mod job;

use std::sync::atomic::{AtomicUsize, Ordering};

pub use engine::BatchScheduler;
pub use job::{JobFailure, JobState, TransferJob};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 32;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Two jobs in one batch share an id.
    #[error("duplicate job id {job_id} in batch")]
    DuplicateJob {
        /// The repeated id.
        job_id: i64,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Counters for one batch run.
///
/// Atomic so concurrent job tasks can update them without locking.
#[derive(Debug, Default)]
pub struct BatchStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    retried: AtomicUsize,
}

impl BatchStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs that fetched bytes and completed.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Jobs that failed after all attempts.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Jobs whose destination was already complete.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Retry attempts made across all jobs.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of jobs that ran to an end state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed() + self.skipped()
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn add_retried(&self, count: usize) {
        self.retried.fetch_add(count, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Self {
        let copy = Self::new();
        copy.completed.store(self.completed(), Ordering::SeqCst);
        copy.failed.store(self.failed(), Ordering::SeqCst);
        copy.skipped.store(self.skipped(), Ordering::SeqCst);
        copy.retried.store(self.retried(), Ordering::SeqCst);
        copy
    }
}

/// Outcome of one batch.
#[derive(Debug)]
pub struct BatchResult {
    /// Every submitted job in id order, in its final state.
    pub jobs: Vec<TransferJob>,
    /// Jobs whose destination was already complete (a subset of the succeeded ids).
    pub skipped_ids: Vec<i64>,
    pub failures: Vec<JobFailure>,
    /// Resume position earned by this batch; `None` when the lowest job did
    /// not complete.
    pub new_cursor: Option<i64>,
    pub stats: BatchStats,
}

impl BatchResult {
    /// Ids of jobs that ended `Completed`, ascending.
    #[must_use]
    pub fn succeeded_ids(&self) -> Vec<i64> {
        self.ids_in(JobState::Completed)
    }

    /// Ids of jobs that ended `Failed`, ascending.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<i64> {
        self.ids_in(JobState::Failed)
    }

    /// Ids of jobs that were never submitted because the batch halted.
    #[must_use]
    pub fn not_started_ids(&self) -> Vec<i64> {
        self.ids_in(JobState::Pending)
    }

    /// Returns true if every job completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.jobs.iter().all(|job| job.state == JobState::Completed)
    }

    fn ids_in(&self, state: JobState) -> Vec<i64> {
        self.jobs
            .iter()
            .filter(|job| job.state == state)
            .map(|job| job.job_id)
            .collect()
    }
}

/// Applies the cursor rule to jobs sorted by id.
pub(crate) fn completed_prefix_cursor(jobs: &[TransferJob]) -> Option<i64> {
    jobs.iter()
        .take_while(|job| job.state == JobState::Completed)
        .last()
        .map(|job| job.job_id)
}
