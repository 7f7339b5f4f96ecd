//! Remote chunk sources.
//!
//! The transfer engine never talks to the messaging service directly. It
//! consumes a [`ChunkSource`]: a primitive that, given a [`MediaLocator`] and
//! a byte offset, yields the object's bytes as a stream of fixed-size chunks.
//!
//! Two adapters ship with the crate:
//! - [`HttpChunkSource`] - one HTTP `Range` request per chunk
//! - `MemoryChunkSource` - in-memory objects with scriptable faults, used
//!   by the crate's own tests

mod http;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::media::MediaLocator;

pub use http::{HttpChunkSource, parse_content_range_total, parse_retry_after};
#[doc(hidden)]
pub use memory::MemoryChunkSource;

/// One block of object bytes.
///
/// A chunk with no bytes and a `total_size` is how a source reports the
/// object's size when the requested offset already lies past its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Bytes,
    /// Total object size when the remote revealed it with this chunk.
    pub total_size: Option<u64>,
}

/// Stream of chunks starting at the requested offset, in offset order.
pub type ChunkStream = BoxStream<'static, Result<Chunk, FetchError>>;

/// Failures reported by a chunk source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The remote asked us to slow down.
    #[error("rate limited by remote{}", wait_suffix(.wait_hint))]
    RateLimited {
        /// Server-declared wait, when the response carried one.
        wait_hint: Option<Duration>,
    },

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// Server-side failure.
    #[error("remote server error {code}")]
    ServerError {
        /// Status code reported by the remote.
        code: u16,
    },

    /// Connection dropped or could not be established.
    #[error("network error: {reason}")]
    Network {
        /// Transport error description.
        reason: String,
    },

    /// The locator's file reference is no longer valid.
    #[error("file reference expired")]
    ReferenceExpired,

    /// Anything that retrying will not fix (bad locator, permission denied, ...).
    #[error("{reason}")]
    Fatal {
        /// Human-readable description.
        reason: String,
    },
}

impl FetchError {
    /// Creates a fatal error.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Creates a network error.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }
}

#[allow(clippy::ref_option)]
fn wait_suffix(wait_hint: &Option<Duration>) -> String {
    wait_hint
        .map(|d| format!(" (wait {}s)", d.as_secs()))
        .unwrap_or_default()
}

/// Fetches byte ranges of located remote objects.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Opens a stream over `locator` starting at byte `offset`, yielding
    /// chunks of at most `chunk_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when the stream cannot be opened; errors
    /// after the first chunk are delivered through the stream.
    async fn open_chunk_stream(
        &self,
        locator: &MediaLocator,
        offset: u64,
        chunk_size: u64,
    ) -> Result<ChunkStream, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::RateLimited {
            wait_hint: Some(Duration::from_secs(12)),
        };
        assert_eq!(err.to_string(), "rate limited by remote (wait 12s)");
        let err = FetchError::RateLimited { wait_hint: None };
        assert_eq!(err.to_string(), "rate limited by remote");
        assert_eq!(
            FetchError::ServerError { code: 502 }.to_string(),
            "remote server error 502"
        );
        assert_eq!(FetchError::fatal("bad locator").to_string(), "bad locator");
    }
}
