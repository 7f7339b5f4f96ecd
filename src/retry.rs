//! Retry logic with a fixed backoff schedule for failed transfers.
//!
//! When a transfer attempt fails, the error is classified into a
//! [`FailureType`]:
//! - [`FailureType::Transient`] - timeouts, 5xx, dropped connections, short bodies
//! - [`FailureType::RateLimited`] - the remote asked us to slow down
//! - [`FailureType::StaleReference`] - the locator's file reference expired
//! - [`FailureType::Permanent`] - anything retrying will not fix
//!
//! [`RetryPolicy`] then decides whether to retry and how long to wait.
//! [`transfer_with_retry`] wraps [`transfer`] in a bounded attempt loop; each
//! attempt resumes from whatever the previous one left in the partial file.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mediafetch_core::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureType::Transient, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(5));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("{reason}"),
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::media::MediaLocator;
use crate::remote::{ChunkSource, FetchError};
use crate::transfer::{TransferError, TransferOutcome, transfer};

/// Default maximum attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default wait before each retry, indexed by retry number.
pub const DEFAULT_BACKOFF_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
];

/// Added on top of a server-provided wait hint.
pub const DEFAULT_HINT_BUFFER: Duration = Duration::from_secs(1);

/// Classification of transfer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,

    /// The remote asked us to slow down, optionally saying for how long.
    RateLimited {
        /// Server-declared wait.
        wait_hint: Option<Duration>,
    },

    /// The file reference expired; a fresh locator is needed.
    StaleReference,

    /// Failure that won't succeed regardless of retries.
    Permanent,
}

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry configuration.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `schedule`: 5s, 15s, 30s, 60s, 120s
/// - `hint_buffer`: 1 second
///
/// The n-th retry waits `schedule[min(n - 1, len - 1)]`. A rate-limit with a
/// wait hint `h` waits `h + hint_buffer` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Wait before each retry; the last entry repeats.
    schedule: Vec<Duration>,

    /// Margin added to server wait hints.
    hint_buffer: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            schedule: DEFAULT_BACKOFF_SCHEDULE.to_vec(),
            hint_buffer: DEFAULT_HINT_BUFFER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1; an empty schedule falls back
    /// to the default one.
    #[must_use]
    pub fn new(max_attempts: u32, schedule: Vec<Duration>, hint_buffer: Duration) -> Self {
        let schedule = if schedule.is_empty() {
            DEFAULT_BACKOFF_SCHEDULE.to_vec()
        } else {
            schedule
        };
        Self {
            max_attempts: max_attempts.max(1),
            schedule,
            hint_buffer,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the scheduled wait for a 0-based retry index.
    #[must_use]
    pub fn backoff_delay(&self, retry_index: usize) -> Duration {
        let last = self.schedule.len().saturating_sub(1);
        self.schedule
            .get(retry_index.min(last))
            .copied()
            .unwrap_or_default()
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let retry_index = attempt.saturating_sub(1) as usize;
        let delay = match failure_type {
            FailureType::RateLimited {
                wait_hint: Some(hint),
            } => hint + self.hint_buffer,
            FailureType::StaleReference => Duration::ZERO,
            _ => self.backoff_delay(retry_index),
        };

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a transfer error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | RateLimited | RateLimited (hint carried through) |
/// | Timeout, Network, 5xx | Transient |
/// | Incomplete body | Transient |
/// | ReferenceExpired | StaleReference |
/// | Fatal, other status | Permanent |
/// | IO, size overrun | Permanent |
#[instrument]
#[allow(clippy::match_same_arms)]
pub fn classify_error(error: &TransferError) -> FailureType {
    match error {
        TransferError::Fetch { source, .. } => match source {
            FetchError::RateLimited { wait_hint } => FailureType::RateLimited {
                wait_hint: *wait_hint,
            },
            FetchError::Timeout | FetchError::Network { .. } => FailureType::Transient,
            FetchError::ServerError { code } if (500..600).contains(code) => {
                FailureType::Transient
            }
            FetchError::ServerError { .. } => FailureType::Permanent,
            FetchError::ReferenceExpired => FailureType::StaleReference,
            FetchError::Fatal { .. } => FailureType::Permanent,
        },
        TransferError::Incomplete { .. } => FailureType::Transient,
        TransferError::Io { .. } => FailureType::Permanent,
        TransferError::Overflow { .. } => FailureType::Permanent,
    }
}

/// Supplies a fresh locator when a file reference expires.
#[async_trait]
pub trait LocatorRefresh: Send + Sync {
    /// Re-resolves the locator for `job_id`; `None` when that is not possible.
    async fn refresh(&self, job_id: i64) -> Option<MediaLocator>;
}

/// Everything one retried transfer needs.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub job_id: i64,
    pub locator: MediaLocator,
    pub destination: PathBuf,
    pub chunk_size: u64,
}

/// Runs [`transfer`] until it succeeds or the policy gives up.
///
/// Returns the outcome and the number of attempts used, or the last error
/// and the number of attempts used.
///
/// # Errors
///
/// Returns the last [`TransferError`] once the failure is permanent or the
/// attempts are exhausted.
#[instrument(skip_all, fields(job_id = request.job_id))]
pub async fn transfer_with_retry<F>(
    source: &dyn ChunkSource,
    request: &TransferRequest,
    policy: &RetryPolicy,
    refresher: Option<&dyn LocatorRefresh>,
    mut on_progress: F,
) -> Result<(TransferOutcome, u32), (TransferError, u32)>
where
    F: FnMut(u64, Option<u64>) + Send,
{
    let mut locator = request.locator.clone();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(attempt, "attempting transfer");

        let error = match transfer(
            source,
            &locator,
            &request.destination,
            request.chunk_size,
            &mut on_progress,
        )
        .await
        {
            Ok(outcome) => return Ok((outcome, attempt)),
            Err(e) => e,
        };

        let failure_type = classify_error(&error);
        match policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next_attempt,
            } => {
                if failure_type == FailureType::StaleReference {
                    let fresh = match refresher {
                        Some(refresher) => refresher.refresh(request.job_id).await,
                        None => None,
                    };
                    let Some(fresh) = fresh else {
                        warn!(error = %error, "file reference expired and could not be refreshed");
                        return Err((error, attempt));
                    };
                    info!(
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        "file reference refreshed, retrying transfer"
                    );
                    locator = fresh;
                    continue;
                }

                info!(
                    attempt = next_attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying transfer"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "not retrying transfer");
                return Err((error, attempt));
            }
        }
    }
}
