use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::{
    BatchResult, BatchStats, DEFAULT_CONCURRENCY, JobFailure, JobState, MAX_CONCURRENCY,
    MIN_CONCURRENCY, SchedulerError, TransferJob, completed_prefix_cursor,
};
use crate::progress::ProgressAggregator;
use crate::remote::ChunkSource;
use crate::retry::{LocatorRefresh, RetryPolicy, TransferRequest, transfer_with_retry};
use crate::transfer::{DEFAULT_CHUNK_SIZE, TransferOutcome};

/// Runs batches of transfer jobs with bounded concurrency.
///
/// # Concurrency Model
///
/// - Each job runs in its own Tokio task
/// - A semaphore permit is acquired before starting each job
/// - Permits are released automatically when jobs finish (RAII)
/// - Jobs are submitted in ascending id order
pub struct BatchScheduler {
    max_concurrency: usize,
    chunk_size: u64,
    retry_policy: RetryPolicy,
    source: Arc<dyn ChunkSource>,
    refresher: Option<Arc<dyn LocatorRefresh>>,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("max_concurrency", &self.max_concurrency)
            .field("chunk_size", &self.chunk_size)
            .field("retry_policy", &self.retry_policy)
            .field("has_refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

impl BatchScheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConcurrency`] if `max_concurrency` is
    /// outside 1-32.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use mediafetch_core::{BatchScheduler, MemoryChunkSource, RetryPolicy};
    ///
    /// let scheduler =
    ///     BatchScheduler::new(3, RetryPolicy::default(), Arc::new(MemoryChunkSource::new())).unwrap();
    /// assert_eq!(scheduler.max_concurrency(), 3);
    /// ```
    #[instrument(level = "debug", skip(retry_policy, source))]
    pub fn new(
        max_concurrency: usize,
        retry_policy: RetryPolicy,
        source: Arc<dyn ChunkSource>,
    ) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(SchedulerError::InvalidConcurrency {
                value: max_concurrency,
            });
        }

        debug!(
            max_concurrency,
            max_attempts = retry_policy.max_attempts(),
            "creating batch scheduler"
        );

        Ok(Self {
            max_concurrency,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry_policy,
            source,
            refresher: None,
        })
    }

    /// Creates a scheduler with the default concurrency (3).
    #[must_use]
    pub fn with_defaults(source: Arc<dyn ChunkSource>) -> Self {
        Self {
            max_concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry_policy: RetryPolicy::default(),
            source,
            refresher: None,
        }
    }

    /// Sets the chunk size used for every transfer (minimum 1 byte).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the collaborator that refreshes expired file references.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn LocatorRefresh>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Runs one batch to completion.
    ///
    /// Jobs start in ascending id order. After the first failure no further
    /// jobs are started; running jobs finish and are reported.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::DuplicateJob`] before starting anything if
    /// two jobs share an id, and [`SchedulerError::SemaphoreClosed`] if the
    /// semaphore is closed.
    ///
    /// Note: individual job failures do NOT cause this method to error; they
    /// are reported in the [`BatchResult`].
    #[instrument(skip(self, jobs, progress), fields(jobs = jobs.len()))]
    pub async fn run_batch(
        &self,
        mut jobs: Vec<TransferJob>,
        progress: &Arc<ProgressAggregator>,
    ) -> Result<BatchResult, SchedulerError> {
        let mut seen = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if !seen.insert(job.job_id) {
                return Err(SchedulerError::DuplicateJob { job_id: job.job_id });
            }
        }
        jobs.sort_by_key(|job| job.job_id);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let halted = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(BatchStats::new());
        let mut handles = Vec::with_capacity(jobs.len());
        let mut finished: Vec<JobReport> = Vec::with_capacity(jobs.len());

        info!(max_concurrency = self.max_concurrency, "starting batch");

        for job in jobs {
            if halted.load(Ordering::SeqCst) {
                finished.push(JobReport::not_started(job));
                continue;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| SchedulerError::SemaphoreClosed)?;

            // A job that failed while we waited for the permit halts the batch.
            if halted.load(Ordering::SeqCst) {
                drop(permit);
                finished.push(JobReport::not_started(job));
                continue;
            }

            debug!(job_id = job.job_id, "submitting job");

            let fallback = job.clone();
            let source = Arc::clone(&self.source);
            let refresher = self.refresher.clone();
            let policy = self.retry_policy.clone();
            let chunk_size = self.chunk_size;
            let progress = Arc::clone(progress);
            let stats = Arc::clone(&stats);
            let halted = Arc::clone(&halted);

            let handle = tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;
                let report = run_job(
                    job,
                    source.as_ref(),
                    refresher.as_deref(),
                    &policy,
                    chunk_size,
                    &progress,
                    &stats,
                )
                .await;
                if report.job.state == JobState::Failed {
                    halted.store(true, Ordering::SeqCst);
                }
                report
            });
            handles.push((handle, fallback));
        }

        debug!(task_count = handles.len(), "waiting for jobs to complete");

        for (handle, fallback) in handles {
            match handle.await {
                Ok(report) => finished.push(report),
                Err(e) => {
                    warn!(job_id = fallback.job_id, error = %e, "transfer task panicked");
                    progress.finish(fallback.job_id, false);
                    stats.increment_failed();
                    finished.push(JobReport::panicked(fallback, &e.to_string()));
                }
            }
        }

        finished.sort_by_key(|report| report.job.job_id);
        let mut skipped_ids = Vec::new();
        let mut failures = Vec::new();
        let mut jobs = Vec::with_capacity(finished.len());
        for report in finished {
            if report.skipped {
                skipped_ids.push(report.job.job_id);
            }
            if let Some(failure) = report.failure {
                failures.push(failure);
            }
            jobs.push(report.job);
        }

        let new_cursor = completed_prefix_cursor(&jobs);
        info!(
            completed = stats.completed(),
            skipped = stats.skipped(),
            failed = stats.failed(),
            retried = stats.retried(),
            cursor = ?new_cursor,
            "batch complete"
        );

        // All tasks are joined, so this is normally the only reference left.
        let stats = Arc::try_unwrap(stats).unwrap_or_else(|shared| shared.snapshot());

        Ok(BatchResult {
            jobs,
            skipped_ids,
            failures,
            new_cursor,
            stats,
        })
    }
}

/// Final state of one job as reported by its task.
struct JobReport {
    job: TransferJob,
    skipped: bool,
    failure: Option<JobFailure>,
}

impl JobReport {
    fn not_started(job: TransferJob) -> Self {
        Self {
            job,
            skipped: false,
            failure: None,
        }
    }

    fn panicked(mut job: TransferJob, error: &str) -> Self {
        job.state = JobState::Failed;
        let failure = JobFailure {
            job_id: job.job_id,
            error: format!("transfer task panicked: {error}"),
            attempts: job.attempts,
        };
        Self {
            job,
            skipped: false,
            failure: Some(failure),
        }
    }
}

#[instrument(skip_all, fields(job_id = job.job_id))]
async fn run_job(
    mut job: TransferJob,
    source: &dyn ChunkSource,
    refresher: Option<&dyn LocatorRefresh>,
    policy: &RetryPolicy,
    chunk_size: u64,
    progress: &ProgressAggregator,
    stats: &BatchStats,
) -> JobReport {
    job.state = JobState::Active;
    progress.start_job(job.job_id, &job.display_name, job.total_bytes);

    let request = TransferRequest {
        job_id: job.job_id,
        locator: job.locator.clone(),
        destination: job.destination.clone(),
        chunk_size,
    };

    let job_id = job.job_id;
    let mut downloaded = job.downloaded_bytes;
    let mut total = job.total_bytes;
    let result = transfer_with_retry(source, &request, policy, refresher, |done, size| {
        downloaded = done;
        total = size;
        progress.update(job_id, done, size);
    })
    .await;

    job.downloaded_bytes = downloaded;
    job.total_bytes = total;

    match result {
        Ok((outcome, attempts)) => {
            job.attempts = attempts;
            job.state = JobState::Completed;
            job.downloaded_bytes = outcome.bytes();
            stats.add_retried(attempts.saturating_sub(1) as usize);
            progress.finish(job_id, true);

            let skipped = outcome.is_skipped();
            if skipped {
                debug!(path = %job.destination.display(), "already downloaded");
                stats.increment_skipped();
            } else if let TransferOutcome::Completed {
                path,
                bytes,
                resumed_from,
            } = &outcome
            {
                info!(path = %path.display(), bytes, resumed_from, attempts, "job completed");
                stats.increment_completed();
            }

            JobReport {
                job,
                skipped,
                failure: None,
            }
        }
        Err((error, attempts)) => {
            job.attempts = attempts;
            job.state = JobState::Failed;
            stats.add_retried(attempts.saturating_sub(1) as usize);
            stats.increment_failed();
            progress.finish(job_id, false);

            warn!(
                path = %job.destination.display(),
                error = %error,
                attempts,
                "job failed after all attempts"
            );

            let failure = JobFailure {
                job_id,
                error: error.to_string(),
                attempts,
            };
            JobReport {
                job,
                skipped: false,
                failure: Some(failure),
            }
        }
    }
}
