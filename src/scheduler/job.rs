use std::path::PathBuf;

use crate::media::MediaLocator;

/// Lifecycle of a job as observed from outside the scheduler.
///
/// Retries happen inside `Active`; a job left in `Pending` after a batch
/// was never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One media object to move to disk. The job id is the message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub job_id: i64,
    pub locator: MediaLocator,
    pub destination: PathBuf,
    /// Label shown in progress output.
    pub display_name: String,
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
    pub attempts: u32,
    pub state: JobState,
}

impl TransferJob {
    /// Creates a pending job; the display name defaults to the destination's
    /// file name.
    #[must_use]
    pub fn new(job_id: i64, locator: MediaLocator, destination: PathBuf) -> Self {
        let display_name = destination
            .file_name()
            .map_or_else(|| job_id.to_string(), |name| name.to_string_lossy().into_owned());
        Self {
            job_id,
            total_bytes: locator.size_bytes,
            locator,
            destination,
            display_name,
            downloaded_bytes: 0,
            attempts: 0,
            state: JobState::Pending,
        }
    }
}

/// A job that ended `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job_id: i64,
    /// Last error, rendered.
    pub error: String,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;

    #[test]
    fn test_transfer_job_new_defaults() {
        let locator = MediaLocator {
            locator_id: "x".to_string(),
            access_token: String::new(),
            routing_key: "dc1".to_string(),
            size_bytes: Some(99),
            kind: MediaKind::Photo,
            reference: String::new(),
            variant: None,
            file_name: None,
            mime_type: None,
        };
        let job = TransferJob::new(12, locator, PathBuf::from("/out/12_x.jpg"));
        assert_eq!(job.display_name, "12_x.jpg");
        assert_eq!(job.total_bytes, Some(99));
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.state.as_str(), "pending");
    }
}
