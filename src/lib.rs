//! mediafetch Core Library
//!
//! This library provides the transfer engine behind the `mediafetch` tool,
//! which walks the messages of a chat scope page by page and saves the media
//! object attached to each message to local storage.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`media`] - Message payload model and media locator resolution
//! - [`remote`] - Chunk source interface plus HTTP and in-memory adapters
//! - [`transfer`] - Chunked, resumable fetch-and-write of one object
//! - [`retry`] - Failure classification and backoff schedule
//! - [`scheduler`] - Bounded-concurrency batch runner and cursor computation
//! - [`progress`] - Live per-job progress display
//! - [`cursor`] - Persisted per-scope resume cursors
//! - [`pipeline`] - Page-by-page enumeration loop tying everything together
//! - [`config`] - Immutable run configuration and config file loading

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod cursor;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod transfer;

// Re-export commonly used types
pub use config::{ConfigError, FileConfig, RunConfig, load_default_file_config, load_file_config};
pub use cursor::{CursorError, CursorStore, LAST_PROCESSED_KEY};
pub use media::{
    DownloadKind, MediaFilter, MediaKind, MediaLocator, MediaPayload, MessageDescriptor,
    Resolution, resolve_locator,
};
pub use pipeline::{
    DestinationNamer, FlatNamer, JsonMessageSource, MessageRefresher, MessageSource, Pipeline,
    PipelineError, RunSummary, SourceError,
};
pub use progress::{ProgressAggregator, ProgressSnapshot};
pub use remote::{Chunk, ChunkSource, ChunkStream, FetchError, HttpChunkSource};
#[doc(hidden)]
pub use remote::MemoryChunkSource;
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, LocatorRefresh, RetryDecision, RetryPolicy,
    TransferRequest, classify_error, transfer_with_retry,
};
pub use scheduler::{
    BatchResult, BatchScheduler, BatchStats, DEFAULT_CONCURRENCY, JobFailure, JobState,
    SchedulerError, TransferJob,
};
pub use transfer::{
    DEFAULT_CHUNK_SIZE, PARTIAL_SUFFIX, TransferError, TransferOutcome, partial_path_for, transfer,
};
