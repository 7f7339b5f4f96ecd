//! Page-by-page enumeration and download.
//!
//! [`Pipeline::run`] is an explicit loop:
//!
//! 1. read the persisted cursor for the scope
//! 2. fetch the next page of messages after it
//! 3. resolve each message and build one job per downloadable object
//! 4. run the jobs as one batch
//! 5. advance the cursor as far as the batch earned
//! 6. pause, then continue from the new cursor
//!
//! The loop ends when the source runs dry or a batch fails. A failed batch
//! leaves the cursor below the failed message so the next run retries it.

mod json_source;
mod naming;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, RunConfig};
use crate::cursor::{CursorError, CursorStore};
use crate::media::{MediaFilter, MediaLocator, MessageDescriptor, Resolution, resolve_locator};
use crate::progress::ProgressAggregator;
use crate::remote::ChunkSource;
use crate::retry::LocatorRefresh;
use crate::scheduler::{BatchScheduler, JobFailure, JobState, SchedulerError, TransferJob};

pub use json_source::JsonMessageSource;
pub use naming::FlatNamer;

/// Failure reported by a message source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("message source error: {reason}")]
pub struct SourceError {
    pub reason: String,
}

impl SourceError {
    /// Creates a source error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Paginated message enumeration.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Returns up to `limit` messages with an id greater than `after_id`, in
    /// ascending id order. An empty page means there is nothing left.
    async fn fetch_page(
        &self,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<MessageDescriptor>, SourceError>;

    /// Fetches one message again, e.g. to re-resolve an expired reference.
    async fn fetch_message(&self, id: i64) -> Result<Option<MessageDescriptor>, SourceError>;
}

/// Maps a message and its locator to the final file path.
pub trait DestinationNamer: Send + Sync {
    fn destination_for(&self, message: &MessageDescriptor, locator: &MediaLocator) -> PathBuf;
}

/// Errors that stop a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Totals for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages: usize,
    /// Messages seen, with or without media.
    pub messages: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub retried: usize,
    /// Messages that produced no job (no media, unsupported or filtered).
    pub ignored: usize,
    /// Persisted cursor when the run ended.
    pub cursor: i64,
    /// True when a batch failure stopped the run early.
    pub halted: bool,
    pub failures: Vec<JobFailure>,
}

/// Re-resolves locators through the message source.
pub struct MessageRefresher {
    messages: Arc<dyn MessageSource>,
    filter: MediaFilter,
}

impl MessageRefresher {
    #[must_use]
    pub fn new(messages: Arc<dyn MessageSource>, filter: MediaFilter) -> Self {
        Self { messages, filter }
    }
}

#[async_trait]
impl LocatorRefresh for MessageRefresher {
    async fn refresh(&self, job_id: i64) -> Option<MediaLocator> {
        let message = match self.messages.fetch_message(job_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(job_id, "message no longer available for refresh");
                return None;
            }
            Err(e) => {
                warn!(job_id, error = %e, "failed to refetch message");
                return None;
            }
        };
        match resolve_locator(&message, &self.filter) {
            Resolution::Media(locator) => Some(locator),
            _ => None,
        }
    }
}

/// Drives enumeration, resolution, batches and cursor persistence.
pub struct Pipeline {
    config: RunConfig,
    messages: Arc<dyn MessageSource>,
    namer: Arc<dyn DestinationNamer>,
    scheduler: BatchScheduler,
    cursor: CursorStore,
    progress: Arc<ProgressAggregator>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validates `config` and wires the collaborators together.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] or [`PipelineError::Scheduler`] when
    /// the configuration is out of range.
    pub fn new(
        config: RunConfig,
        messages: Arc<dyn MessageSource>,
        namer: Arc<dyn DestinationNamer>,
        chunk_source: Arc<dyn ChunkSource>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let refresher = MessageRefresher::new(Arc::clone(&messages), config.filter.clone());
        let scheduler =
            BatchScheduler::new(config.max_concurrency, config.retry.clone(), chunk_source)?
                .with_chunk_size(config.chunk_size)
                .with_refresher(Arc::new(refresher));
        let progress = if config.show_progress {
            ProgressAggregator::new()
        } else {
            ProgressAggregator::hidden()
        };

        Ok(Self {
            cursor: CursorStore::new(config.state_dir.clone()),
            config,
            messages,
            namer,
            scheduler,
            progress: Arc::new(progress),
        })
    }

    /// Returns the cursor store this pipeline persists to.
    #[must_use]
    pub fn cursor_store(&self) -> &CursorStore {
        &self.cursor
    }

    /// Returns the shared progress aggregator.
    #[must_use]
    pub fn progress(&self) -> &Arc<ProgressAggregator> {
        &self.progress
    }

    /// Runs until the source is drained or a batch fails.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the source, the cursor store or the
    /// scheduler fails. Individual job failures are not errors; they set
    /// [`RunSummary::halted`].
    #[instrument(skip(self), fields(scope = %self.config.scope))]
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let scope = self.config.scope.as_str();
        let mut after_id = self.cursor.get(scope).await;
        let mut summary = RunSummary {
            cursor: after_id,
            ..RunSummary::default()
        };

        info!(after_id, page_size = self.config.page_size, "starting run");

        loop {
            let page = self
                .messages
                .fetch_page(after_id, self.config.page_size)
                .await?;
            let Some(page_max) = page.iter().map(|message| message.id).max() else {
                debug!(after_id, "no more messages");
                break;
            };
            if page_max <= after_id {
                warn!(after_id, page_max, "message source returned a page that does not advance");
                break;
            }

            summary.pages += 1;
            summary.messages += page.len();

            let jobs = self.build_jobs(&page, &mut summary);
            debug!(
                page = summary.pages,
                messages = page.len(),
                jobs = jobs.len(),
                "page resolved"
            );

            let page_cursor = if jobs.is_empty() {
                Some(page_max)
            } else {
                let result = self.scheduler.run_batch(jobs, &self.progress).await?;
                summary.completed += result.stats.completed();
                summary.skipped += result.stats.skipped();
                summary.failed += result.stats.failed();
                summary.retried += result.stats.retried();
                summary.failures.extend(result.failures.iter().cloned());

                let first_unfinished = result
                    .jobs
                    .iter()
                    .find(|job| job.state != JobState::Completed)
                    .map(|job| job.job_id);
                match first_unfinished {
                    None => Some(page_max),
                    Some(stop) => {
                        summary.halted = true;
                        page
                            .iter()
                            .map(|message| message.id)
                            .filter(|id| *id < stop)
                            .max()
                    }
                }
            };

            if let Some(position) = page_cursor
                && self.cursor.advance(scope, position).await?
            {
                summary.cursor = position;
                debug!(cursor = position, "cursor advanced");
            }

            if summary.halted {
                warn!(
                    cursor = summary.cursor,
                    failed = summary.failed,
                    "batch failed, stopping run"
                );
                break;
            }

            after_id = page_max;
            if page.len() < self.config.page_size {
                debug!("short page, source drained");
                break;
            }
            if !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        info!(
            pages = summary.pages,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            cursor = summary.cursor,
            "run finished"
        );
        Ok(summary)
    }

    fn build_jobs(&self, page: &[MessageDescriptor], summary: &mut RunSummary) -> Vec<TransferJob> {
        let mut jobs = Vec::new();
        for message in page {
            match resolve_locator(message, &self.config.filter) {
                Resolution::Media(locator) => {
                    let destination = self.namer.destination_for(message, &locator);
                    jobs.push(TransferJob::new(message.id, locator, destination));
                }
                Resolution::NoMedia => summary.ignored += 1,
                Resolution::Unsupported { kind } => {
                    debug!(message_id = message.id, kind, "unsupported media");
                    summary.ignored += 1;
                }
                Resolution::Filtered { reason } => {
                    debug!(message_id = message.id, reason, "media filtered out");
                    summary.ignored += 1;
                }
            }
        }
        jobs
    }
}
