//! Live per-job byte progress.
//!
//! One bar per active job inside a shared [`MultiProgress`]. Jobs whose size
//! is not known yet render as a byte spinner and switch to a bar, keeping
//! their position, once a total arrives.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

/// Point-in-time view of one active job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub job_id: i64,
    pub display_name: String,
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
}

struct Entry {
    display_name: String,
    total: Option<u64>,
    downloaded: u64,
    bar: ProgressBar,
}

/// Tracks byte progress of every active job.
///
/// All calls take `&self`; entries sit behind one mutex so concurrent jobs
/// can report without coordination.
pub struct ProgressAggregator {
    multi: MultiProgress,
    entries: Mutex<HashMap<i64, Entry>>,
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    /// Renders to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    /// Tracks progress without drawing anything.
    #[must_use]
    pub fn hidden() -> Self {
        Self::with_draw_target(ProgressDrawTarget::hidden())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a job. A second start for the same id is ignored.
    pub fn start_job(&self, job_id: i64, display_name: &str, total: Option<u64>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&job_id) {
            debug!(job_id, "progress entry already exists");
            return;
        }

        let bar = match total {
            Some(len) => ProgressBar::new(len).with_style(bar_style()),
            None => ProgressBar::new_spinner().with_style(spinner_style()),
        };
        bar.set_message(display_name.to_string());
        let bar = self.multi.add(bar);

        entries.insert(
            job_id,
            Entry {
                display_name: display_name.to_string(),
                total,
                downloaded: 0,
                bar,
            },
        );
    }

    /// Records `downloaded` bytes for a job, retargeting the bar when a total
    /// first becomes known. Unknown ids are ignored.
    pub fn update(&self, job_id: i64, downloaded: u64, total: Option<u64>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(&job_id) else {
            return;
        };

        if let Some(len) = total
            && entry.total != Some(len)
        {
            entry.bar.set_length(len);
            entry.bar.set_style(bar_style());
            entry.total = Some(len);
        }
        entry.downloaded = downloaded;
        entry.bar.set_position(downloaded);
    }

    /// Removes a job. Success snaps the bar to full first; failure abandons it
    /// where it stopped. Unknown ids are ignored.
    pub fn finish(&self, job_id: i64, ok: bool) {
        let Some(entry) = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id)
        else {
            return;
        };

        if ok {
            if let Some(len) = entry.bar.length() {
                entry.bar.set_position(len);
            }
            entry.bar.finish();
        } else {
            entry.bar.abandon();
        }
        self.multi.remove(&entry.bar);
    }

    /// Returns the active jobs ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProgressSnapshot> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot: Vec<ProgressSnapshot> = entries
            .iter()
            .map(|(job_id, entry)| ProgressSnapshot {
                job_id: *job_id,
                display_name: entry.display_name.clone(),
                total_bytes: entry.total,
                downloaded_bytes: entry.downloaded,
            })
            .collect();
        snapshot.sort_by_key(|entry| entry.job_id);
        snapshot
    }

    /// Number of jobs currently tracked.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg:24!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {msg:24!} {bytes} {bytes_per_sec}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
