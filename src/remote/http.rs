//! HTTP range-request chunk source.
//!
//! Each chunk is one `GET {base}/{routing_key}/{locator_id}` with a
//! `Range: bytes=start-end` header. The object's total size is learned from
//! the `Content-Range` header of the first partial response, so locators
//! with an unknown size still terminate cleanly.
//!
//! A remote that ignores `Range` and answers `200` at offset zero is read
//! as one streamed body, cut into chunks of at most the requested size.
//! A `416` carrying `Content-Range: bytes */N` is passed on as an empty
//! chunk with `total_size` set, so callers holding an oversized partial
//! can tell it is stale.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, RANGE, RETRY_AFTER};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{Chunk, ChunkSource, ChunkStream, FetchError};
use crate::media::MediaLocator;

/// Default connect timeout (30 seconds).
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default per-request timeout (2 minutes; one request covers one chunk).
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Maximum honoured Retry-After value (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Header carrying the locator's opaque file reference.
const FILE_REFERENCE_HEADER: &str = "x-file-reference";

/// Chunk source backed by HTTP range requests.
#[derive(Debug, Clone)]
pub struct HttpChunkSource {
    client: Client,
    base_url: Url,
    default_token: Option<String>,
}

impl HttpChunkSource {
    /// Creates a source rooted at `base_url` with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Fatal`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        Self::with_timeouts(base_url, CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS)
    }

    /// Creates a source with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Fatal`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn with_timeouts(
        base_url: &str,
        connect_timeout_secs: u64,
        request_timeout_secs: u64,
    ) -> Result<Self, FetchError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| FetchError::fatal(format!("invalid remote base URL '{base_url}': {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| FetchError::fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            default_token: None,
        })
    }

    /// Sets a bearer token used for locators that carry no access token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.default_token = Some(token.into());
        self
    }

    /// Returns the URL an object is fetched from.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Fatal`] if the locator does not form a valid path.
    pub fn object_url(&self, locator: &MediaLocator) -> Result<Url, FetchError> {
        let mut url = self
            .base_url
            .join(&format!("{}/{}", locator.routing_key, locator.locator_id))
            .map_err(|e| FetchError::fatal(format!("invalid locator path: {e}")))?;
        if let Some(variant) = &locator.variant {
            url.query_pairs_mut().append_pair("variant", variant);
        }
        Ok(url)
    }
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    #[instrument(skip(self, locator), fields(locator_id = %locator.locator_id))]
    async fn open_chunk_stream(
        &self,
        locator: &MediaLocator,
        offset: u64,
        chunk_size: u64,
    ) -> Result<ChunkStream, FetchError> {
        if chunk_size == 0 {
            return Err(FetchError::fatal("chunk size must be positive"));
        }

        let state = RangeReader {
            client: self.client.clone(),
            url: self.object_url(locator)?,
            access_token: if locator.access_token.is_empty() {
                self.default_token.clone().unwrap_or_default()
            } else {
                locator.access_token.clone()
            },
            reference: locator.reference.clone(),
            offset,
            chunk_size,
            total: locator.size_bytes,
            done: false,
            body: None,
            pending: Bytes::new(),
        };

        let chunks = stream::unfold(state, |mut reader| async move {
            if reader.done || reader.total.is_some_and(|total| reader.offset >= total) {
                return None;
            }
            match reader.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), reader)),
                Ok(None) => None,
                Err(e) => {
                    reader.done = true;
                    Some((Err(e), reader))
                }
            }
        });

        Ok(chunks.boxed())
    }
}

/// Walks one object range by range.
struct RangeReader {
    client: Client,
    url: Url,
    access_token: String,
    reference: String,
    offset: u64,
    chunk_size: u64,
    total: Option<u64>,
    done: bool,
    /// Whole-object body, set when the remote ignored the range header.
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    /// Body bytes received but not yet handed out.
    pending: Bytes,
}

impl RangeReader {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, FetchError> {
        if self.body.is_some() {
            return self.next_body_chunk().await;
        }

        let end = self.offset + self.chunk_size - 1;
        let mut request = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={}-{end}", self.offset));
        if !self.access_token.is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.access_token));
        }
        if !self.reference.is_empty() {
            request = request.header(FILE_REFERENCE_HEADER, &self.reference);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();

        match status {
            206 => {
                if let Some(total) = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range_total)
                {
                    self.total = Some(total);
                }
            }
            200 if self.offset == 0 => {
                debug!(url = %self.url, "remote ignored range header, streaming whole object");
                if self.total.is_none() {
                    self.total = response.content_length();
                }
                self.body = Some(response.bytes_stream().boxed());
                return self.next_body_chunk().await;
            }
            200 => {
                return Err(FetchError::fatal(
                    "remote ignored range request for a resumed transfer",
                ));
            }
            416 => {
                let total = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range_total);
                debug!(offset = self.offset, ?total, "range starts past end of object");
                self.done = true;
                let Some(total) = total else {
                    return Ok(None);
                };
                self.total = Some(total);
                return Ok(Some(Chunk {
                    bytes: Bytes::new(),
                    total_size: Some(total),
                }));
            }
            _ => return Err(status_error(status, &response)),
        }

        let body = response.bytes().await.map_err(map_transport_error)?;
        if body.is_empty() {
            return Ok(None);
        }

        // Short read with no declared size marks the end of the object.
        if self.total.is_none() && (body.len() as u64) < self.chunk_size {
            self.done = true;
        }
        Ok(Some(self.emit(body)))
    }

    /// Cuts the next chunk out of a whole-object body.
    async fn next_body_chunk(&mut self) -> Result<Option<Chunk>, FetchError> {
        let limit = usize::try_from(self.chunk_size).unwrap_or(usize::MAX);
        let mut buf = BytesMut::new();

        while buf.len() < limit {
            if self.pending.is_empty() {
                let next = match self.body.as_mut() {
                    Some(body) => body.next().await,
                    None => None,
                };
                match next {
                    Some(piece) => self.pending = piece.map_err(map_transport_error)?,
                    None => {
                        self.body = None;
                        break;
                    }
                }
                continue;
            }

            let take = (limit - buf.len()).min(self.pending.len());
            if buf.is_empty() && take == limit {
                let bytes = self.pending.split_to(take);
                return Ok(Some(self.emit(bytes)));
            }
            buf.extend_from_slice(&self.pending.split_to(take));
        }

        if self.body.is_none() {
            self.done = true;
        }
        if buf.is_empty() {
            self.total = Some(self.offset);
            return Ok(None);
        }
        Ok(Some(self.emit(buf.freeze())))
    }

    fn emit(&mut self, bytes: Bytes) -> Chunk {
        self.offset += bytes.len() as u64;
        if self.done {
            self.total = Some(self.offset);
        }
        Chunk {
            bytes,
            total_size: self.total,
        }
    }
}

fn map_transport_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::network(error.to_string())
    }
}

/// Maps a non-success status to a fetch error.
#[allow(clippy::match_same_arms)]
fn status_error(status: u16, response: &reqwest::Response) -> FetchError {
    match status {
        401 | 403 => FetchError::fatal(format!("access denied (HTTP {status})")),
        404 => FetchError::fatal("remote object not found (HTTP 404)"),
        408 => FetchError::Timeout,
        410 => FetchError::ReferenceExpired,
        429 => FetchError::RateLimited {
            wait_hint: response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after),
        },
        500..=599 => FetchError::ServerError { code: status },
        _ => FetchError::fatal(format!("unexpected HTTP status {status}")),
    }
}

/// Extracts the complete length from a `Content-Range` header value.
///
/// ```
/// use mediafetch_core::remote::parse_content_range_total;
///
/// assert_eq!(parse_content_range_total("bytes 0-99/1000"), Some(1000));
/// assert_eq!(parse_content_range_total("bytes */1000"), Some(1000));
/// assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
/// ```
#[must_use]
pub fn parse_content_range_total(header_value: &str) -> Option<u64> {
    let (_, total) = header_value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Parses a Retry-After header value into a Duration.
///
/// Accepts delay-seconds or an HTTP-date. Negative and unparseable values
/// yield `None`; values above one hour are capped.
///
/// ```
/// use std::time::Duration;
/// use mediafetch_core::remote::parse_retry_after;
///
/// assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => Some(Duration::ZERO),
    }
}
