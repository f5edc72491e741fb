//! Buffered ingestion and format detection.
//!
//! [`Ingestor::drain`] reads a source to exhaustion through fixed-size
//! staging chunks borrowed from a shared [`BufferPool`]. Every byte is copied
//! out of the chunk before the chunk goes back to the pool, so the returned
//! [`Bytes`] never alias pooled memory.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use pf_core::{Error, ErrorKind, Format, Result, Scope};
use tokio::io::{AsyncRead, AsyncReadExt};

const OP: &str = "ingest";

/// Chunks kept for reuse; extra returned chunks are dropped.
const MAX_POOLED: usize = 64;

/// Upper bound on capacity reserved up front from a size hint.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Bytes examined by the fallback sniffer.
const SNIFF_LEN: usize = 512;

// ---------------------------------------------------------------------------
// BufferPool
// ---------------------------------------------------------------------------

/// Shared pool of equally sized staging chunks.
#[derive(Debug)]
pub struct BufferPool {
    chunk_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Borrow a chunk. It returns to the pool when the guard drops.
    pub fn acquire(&self) -> PooledChunk<'_> {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0; self.chunk_size]);
        PooledChunk {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Number of idle chunks.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn release(&self, buf: Vec<u8>) {
        let mut free = self.free.lock();
        if free.len() < MAX_POOLED && buf.len() == self.chunk_size {
            free.push(buf);
        }
    }
}

/// RAII guard over a pooled chunk.
pub struct PooledChunk<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl Deref for PooledChunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledChunk<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledChunk<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

/// Drains readers into owned byte buffers under an optional ceiling.
#[derive(Debug, Clone)]
pub struct Ingestor {
    pool: Arc<BufferPool>,
    max_bytes: Option<u64>,
}

impl Ingestor {
    pub fn new(pool: Arc<BufferPool>, max_bytes: Option<u64>) -> Self {
        Self { pool, max_bytes }
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Read `reader` to EOF.
    ///
    /// Fails with a size-limit input error as soon as the ceiling would be
    /// crossed; a partial buffer is never returned. Each read races the
    /// scope, so a cancelled or expired scope interrupts a stalled reader.
    pub async fn drain<R>(&self, scope: &Scope, reader: &mut R, size_hint: Option<u64>) -> Result<Bytes>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if let (Some(limit), Some(hint)) = (self.max_bytes, size_hint) {
            if hint > limit {
                return Err(Error::input(OP, ErrorKind::SizeLimit { limit }));
            }
        }

        let initial = size_hint
            .map(|h| h.min(MAX_PREALLOC) as usize)
            .unwrap_or(self.pool.chunk_size());
        let mut out = BytesMut::with_capacity(initial);
        let mut chunk = self.pool.acquire();

        loop {
            scope.check(OP)?;
            let n = tokio::select! {
                biased;
                reason = scope.done() => return Err(Error::pipeline(OP, reason)),
                read = reader.read(&mut chunk[..]) => {
                    read.map_err(|e| Error::input(OP, e.into()))?
                }
            };
            if n == 0 {
                break;
            }
            if let Some(limit) = self.max_bytes {
                if (out.len() + n) as u64 > limit {
                    return Err(Error::input(OP, ErrorKind::SizeLimit { limit }));
                }
            }
            out.extend_from_slice(&chunk[..n]);
        }

        tracing::trace!(bytes = out.len(), "ingested source");
        Ok(out.freeze())
    }
}

// ---------------------------------------------------------------------------
// Format detection
// ---------------------------------------------------------------------------

/// Sniff the format from leading magic bytes, falling back to `infer`.
pub fn detect_format(data: &[u8]) -> Format {
    if data.len() < 4 {
        return Format::Unknown;
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Format::Jpeg;
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Format::Png;
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Format::Webp;
    }

    let head = &data[..data.len().min(SNIFF_LEN)];
    infer::get(head)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| Format::from_content_type(kind.mime_type()))
        .unwrap_or(Format::Unknown)
}

/// The format for ingested bytes. An explicit content-type hint always wins,
/// even when it maps to `Unknown`.
pub fn resolve_format(data: &[u8], content_type: Option<&str>) -> Format {
    match content_type {
        Some(ct) => Format::from_content_type(ct),
        None => detect_format(data),
    }
}
