//! In-memory chunk source with scriptable faults.
//!
//! Serves objects from a map keyed by locator id. Faults are queued per
//! locator and consumed one per opened stream, which makes it possible to
//! script "drop the connection after two chunks, then succeed" sequences.
//!
//! This is a test double: it is public so integration tests can drive the
//! engine with it, but it is not part of the documented API.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;

use super::{Chunk, ChunkSource, ChunkStream, FetchError};
use crate::media::MediaLocator;

#[derive(Debug, Clone)]
struct Fault {
    after_chunks: usize,
    error: FetchError,
}

/// Shared counters, cloned into every open stream.
#[derive(Debug, Default)]
struct Counters {
    chunk_fetches: AtomicUsize,
    opens: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

/// Marks a stream as active until dropped.
struct ActiveGuard(Arc<Counters>);

impl ActiveGuard {
    fn enter(counters: &Arc<Counters>) -> Self {
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_active.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(counters))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Chunk source serving in-memory objects.
#[derive(Debug, Default)]
pub struct MemoryChunkSource {
    objects: Mutex<HashMap<String, Bytes>>,
    faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    chunk_delay: Option<Duration>,
    counters: Arc<Counters>,
}

impl MemoryChunkSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps before yielding each chunk, so concurrent streams overlap.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Stores an object under `locator_id`.
    pub fn insert(&self, locator_id: impl Into<String>, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator_id.into(), Bytes::from(bytes));
    }

    /// Queues a fault: the next stream opened for `locator_id` yields
    /// `after_chunks` chunks and then `error`.
    pub fn fail_next(&self, locator_id: impl Into<String>, after_chunks: usize, error: FetchError) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(locator_id.into())
            .or_default()
            .push_back(Fault {
                after_chunks,
                error,
            });
    }

    /// Total chunks served across all streams.
    #[must_use]
    pub fn chunk_fetches(&self) -> usize {
        self.counters.chunk_fetches.load(Ordering::SeqCst)
    }

    /// Number of streams opened.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    /// Highest number of streams that were open at the same time.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.counters.peak_active.load(Ordering::SeqCst)
    }

    fn take_fault(&self, locator_id: &str) -> Option<Fault> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(locator_id)
            .and_then(VecDeque::pop_front)
    }
}

struct MemoryReader {
    data: Bytes,
    offset: usize,
    chunk_size: usize,
    served: usize,
    fault: Option<Fault>,
    delay: Option<Duration>,
    counters: Arc<Counters>,
    _active: ActiveGuard,
}

#[async_trait]
impl ChunkSource for MemoryChunkSource {
    async fn open_chunk_stream(
        &self,
        locator: &MediaLocator,
        offset: u64,
        chunk_size: u64,
    ) -> Result<ChunkStream, FetchError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);

        let data = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&locator.locator_id)
            .cloned()
            .ok_or_else(|| FetchError::fatal(format!("unknown object '{}'", locator.locator_id)))?;

        let fault = self.take_fault(&locator.locator_id);
        if let Some(fault) = &fault
            && fault.after_chunks == 0
        {
            return Err(fault.error.clone());
        }

        // Offset at or past the end: report the size like an HTTP 416 would.
        if offset > 0 && offset >= data.len() as u64 {
            let size_only = Chunk {
                bytes: Bytes::new(),
                total_size: Some(data.len() as u64),
            };
            return Ok(stream::once(async move { Ok(size_only) }).boxed());
        }

        let reader = MemoryReader {
            offset: usize::try_from(offset).unwrap_or(usize::MAX).min(data.len()),
            chunk_size: usize::try_from(chunk_size.max(1)).unwrap_or(usize::MAX),
            data,
            served: 0,
            fault,
            delay: self.chunk_delay,
            counters: Arc::clone(&self.counters),
            _active: ActiveGuard::enter(&self.counters),
        };

        let chunks = stream::unfold(reader, |mut reader| async move {
            if let Some(delay) = reader.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(fault) = &reader.fault
                && reader.served >= fault.after_chunks
            {
                let error = fault.error.clone();
                reader.fault = None;
                reader.offset = reader.data.len();
                return Some((Err(error), reader));
            }
            if reader.offset >= reader.data.len() {
                return None;
            }

            let end = (reader.offset + reader.chunk_size).min(reader.data.len());
            let chunk = Chunk {
                bytes: reader.data.slice(reader.offset..end),
                total_size: Some(reader.data.len() as u64),
            };
            reader.offset = end;
            reader.served += 1;
            reader.counters.chunk_fetches.fetch_add(1, Ordering::SeqCst);
            Some((Ok(chunk), reader))
        });

        Ok(chunks.boxed())
    }
}
