//! Bounded byte pipe between the websocket receive loop and the CSV parser.
//!
//! `PipeWriter` is used from the async producer task; `PipeReader` exposes a
//! blocking `std::io::Read` for the CSV side and must only be used from a
//! blocking thread (`tokio::task::spawn_blocking`). Capacity is counted in
//! chunks, not bytes: once `capacity` chunks are buffered and unread, writes
//! suspend until the reader catches up.
//!
//! Completion is one-way: dropping the writer (or calling
//! [`PipeWriter::complete`]) marks end-of-stream, after which the reader
//! drains the remaining chunks and then observes EOF. Because `complete`
//! consumes the writer, writing after completion cannot compile.

use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("byte pipe reader was dropped before writing completed")]
    Closed,
}

/// Clonable view of the pipe's current backlog, shared by both ends.
/// Used for the too-fast decision and for progress reporting.
#[derive(Debug, Clone, Default)]
pub struct PipeGauge(Arc<AtomicUsize>);

impl PipeGauge {
    pub fn pending_chunks(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Create a pipe buffering at most `capacity` unread chunks.
pub fn byte_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity);
    let gauge = PipeGauge::default();
    (
        PipeWriter {
            tx,
            gauge: gauge.clone(),
        },
        PipeReader {
            rx,
            gauge,
            current: None,
            offset: 0,
        },
    )
}

pub struct PipeWriter {
    tx: mpsc::Sender<Vec<u8>>,
    gauge: PipeGauge,
}

impl PipeWriter {
    /// Enqueue one chunk, transferring ownership into the pipe. Suspends
    /// while the pipe is at capacity. Fails if the reader is gone.
    pub async fn write(&self, chunk: Vec<u8>) -> Result<(), PipeError> {
        self.tx.send(chunk).await.map_err(|_| PipeError::Closed)?;
        self.gauge.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn pending_chunks(&self) -> usize {
        self.gauge.pending_chunks()
    }

    pub fn gauge(&self) -> PipeGauge {
        self.gauge.clone()
    }

    /// Mark end-of-stream. Equivalent to dropping the writer.
    pub fn complete(self) {}
}

pub struct PipeReader {
    rx: mpsc::Receiver<Vec<u8>>,
    gauge: PipeGauge,
    current: Option<Vec<u8>>,
    offset: usize,
}

impl PipeReader {
    /// Take the next chunk off the queue. `block` controls whether an empty
    /// (but still open) queue waits or returns `None`.
    fn take_next(&mut self, block: bool) -> Option<Vec<u8>> {
        let chunk = if block {
            self.rx.blocking_recv()
        } else {
            self.rx.try_recv().ok()
        };
        if chunk.is_some() {
            self.gauge.0.fetch_sub(1, Ordering::Relaxed);
        }
        chunk
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut copied = 0;
        loop {
            if let Some(chunk) = self.current.as_ref() {
                let n = (buf.len() - copied).min(chunk.len() - self.offset);
                buf[copied..copied + n].copy_from_slice(&chunk[self.offset..self.offset + n]);
                self.offset += n;
                copied += n;
                if self.offset >= chunk.len() {
                    self.current = None;
                    self.offset = 0;
                }
                if copied == buf.len() {
                    return Ok(copied);
                }
            }

            // Block only when nothing has been copied yet; otherwise hand
            // back what we have rather than stalling the parser.
            match self.take_next(copied == 0) {
                Some(chunk) => self.current = Some(chunk),
                None if copied > 0 => return Ok(copied),
                // Writer dropped and queue drained: end of stream.
                None => return Ok(0),
            }
        }
    }
}
