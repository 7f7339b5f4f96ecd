//! Error types for single-object transfers.

use std::path::PathBuf;

use thiserror::Error;

use crate::remote::FetchError;

/// Errors that can end one transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The chunk source reported a failure.
    #[error("fetch failed for object {locator_id}: {source}")]
    Fetch {
        /// Remote object id.
        locator_id: String,
        /// The underlying fetch error.
        #[source]
        source: FetchError,
    },

    /// File system error while writing the partial or renaming it.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The stream ended before the declared size was reached.
    #[error("incomplete transfer for {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Incomplete {
        /// Partial file path.
        path: PathBuf,
        /// Declared size in bytes.
        expected_bytes: u64,
        /// Bytes on disk.
        actual_bytes: u64,
    },

    /// The remote sent more bytes than the declared size.
    #[error("remote overran declared size for {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Overflow {
        /// Partial file path.
        path: PathBuf,
        /// Declared size in bytes.
        expected_bytes: u64,
        /// Bytes received so far, including the offending chunk.
        actual_bytes: u64,
    },
}

impl TransferError {
    /// Creates a fetch error for `locator_id`.
    pub fn fetch(locator_id: impl Into<String>, source: FetchError) -> Self {
        Self::Fetch {
            locator_id: locator_id.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an incomplete-body error.
    pub fn incomplete(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Incomplete {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a size overrun error.
    pub fn overflow(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Overflow {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }
}

// No From<io::Error> / From<FetchError>: every variant needs a path or
// locator id that the source error does not carry.
