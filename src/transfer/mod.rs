//! Chunked, resumable transfer of one remote object.
//!
//! Bytes land in `<destination>.partial`, whose length is the resume offset
//! for the next attempt. The partial is flushed after every chunk, so a
//! killed process never loses more than the chunk in flight. On success the
//! partial is renamed over the destination in one step.

mod error;

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::media::MediaLocator;
use crate::remote::ChunkSource;

pub use error::TransferError;

/// Suffix appended to the destination while a transfer is in progress.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Default chunk size (512 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 512 * 1024;

/// Result of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes were fetched and the destination written.
    Completed {
        path: PathBuf,
        /// Final size in bytes.
        bytes: u64,
        /// Offset the transfer resumed from (0 for a fresh start).
        resumed_from: u64,
    },
    /// The destination already held the complete object; nothing was fetched.
    Skipped { path: PathBuf, bytes: u64 },
}

impl TransferOutcome {
    /// Final size of the destination in bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Completed { bytes, .. } | Self::Skipped { bytes, .. } => *bytes,
        }
    }

    /// Returns true if no remote fetch happened.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Returns the in-progress path for `destination`.
///
/// ```
/// use std::path::Path;
/// use mediafetch_core::partial_path_for;
///
/// assert_eq!(
///     partial_path_for(Path::new("/out/clip.mp4")),
///     Path::new("/out/clip.mp4.partial")
/// );
/// ```
#[must_use]
pub fn partial_path_for(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Transfers one object into `destination`, resuming from any partial file.
///
/// `on_progress(downloaded, total)` is called after each chunk is durably
/// written.
///
/// # Errors
///
/// Returns [`TransferError`] on fetch failures, local I/O failures, or when
/// the byte count disagrees with the declared size. The partial file is left
/// in place for the next attempt.
#[instrument(skip(source, locator, on_progress), fields(locator_id = %locator.locator_id, path = %destination.display()))]
pub async fn transfer<F>(
    source: &dyn ChunkSource,
    locator: &MediaLocator,
    destination: &Path,
    chunk_size: u64,
    mut on_progress: F,
) -> Result<TransferOutcome, TransferError>
where
    F: FnMut(u64, Option<u64>) + Send,
{
    let mut total = locator.size_bytes;

    if let Some(existing) = existing_file_len(destination).await {
        if total.is_none_or(|expected| expected == existing) {
            debug!(bytes = existing, "destination already complete, skipping");
            return Ok(TransferOutcome::Skipped {
                path: destination.to_path_buf(),
                bytes: existing,
            });
        }
        debug!(
            bytes = existing,
            expected = ?total,
            "destination size mismatch, transferring again"
        );
    }

    let partial = partial_path_for(destination);

    loop {
        let existing = prepare_partial(&partial, total).await?;
        let mut file = open_partial(&partial, existing).await?;
        if existing > 0 {
            debug!(offset = existing, "resuming from partial file");
        }

        let mut stream = source
            .open_chunk_stream(locator, existing, chunk_size)
            .await
            .map_err(|e| TransferError::fetch(&locator.locator_id, e))?;

        let mut downloaded = existing;
        let mut stale = false;
        while let Some(next) = stream.next().await {
            let chunk = next.map_err(|e| TransferError::fetch(&locator.locator_id, e))?;
            if total.is_none()
                && let Some(size) = chunk.total_size
            {
                total = Some(size);
                if existing > 0 && existing >= size {
                    stale = true;
                    break;
                }
            }
            if chunk.bytes.is_empty() {
                continue;
            }

            let after = downloaded + chunk.bytes.len() as u64;
            if let Some(expected) = total
                && after > expected
            {
                return Err(TransferError::overflow(&partial, expected, after));
            }

            file.write_all(&chunk.bytes)
                .await
                .map_err(|e| TransferError::io(&partial, e))?;
            file.flush()
                .await
                .map_err(|e| TransferError::io(&partial, e))?;

            downloaded = after;
            on_progress(downloaded, total);
        }

        if stale {
            // Total is now known, so the next pass discards the partial.
            debug!(existing, total = ?total, "remote size shows partial is stale, restarting");
            drop(stream);
            drop(file);
            continue;
        }

        file.sync_all()
            .await
            .map_err(|e| TransferError::io(&partial, e))?;
        drop(file);

        if let Some(expected) = total
            && downloaded != expected
        {
            return Err(TransferError::incomplete(&partial, expected, downloaded));
        }

        tokio::fs::rename(&partial, destination)
            .await
            .map_err(|e| TransferError::io(destination, e))?;

        info!(bytes = downloaded, resumed_from = existing, "transfer complete");

        return Ok(TransferOutcome::Completed {
            path: destination.to_path_buf(),
            bytes: downloaded,
            resumed_from: existing,
        });
    }
}

/// Returns the resume offset for `partial`, discarding a partial that is
/// not shorter than an object of `total` bytes, and creates the parent
/// directory.
async fn prepare_partial(partial: &Path, total: Option<u64>) -> Result<u64, TransferError> {
    let mut existing = existing_file_len(partial).await.unwrap_or(0);

    if let Some(expected) = total
        && existing > 0
        && existing >= expected
    {
        warn!(
            path = %partial.display(),
            existing,
            expected,
            "partial file not shorter than object, discarding"
        );
        tokio::fs::remove_file(partial)
            .await
            .map_err(|e| TransferError::io(partial, e))?;
        existing = 0;
    }

    if let Some(parent) = partial.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io(parent, e))?;
    }

    Ok(existing)
}

async fn existing_file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(std::fs::Metadata::is_file)
        .map(|meta| meta.len())
}

async fn open_partial(partial: &Path, existing: u64) -> Result<File, TransferError> {
    if existing > 0 {
        OpenOptions::new()
            .append(true)
            .open(partial)
            .await
            .map_err(|e| TransferError::io(partial, e))
    } else {
        File::create(partial)
            .await
            .map_err(|e| TransferError::io(partial, e))
    }
}
