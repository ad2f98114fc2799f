//! Tee-while-forwarding body plumbing.
//!
//! The proxied stream must never stall on capture, so the tee is a single
//! pass: every chunk is forwarded immediately and append-copied into a
//! capped accumulator. Once the cap is hit the accumulator silently stops
//! growing while bytes keep flowing and the true length keeps counting.

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Capped byte sink shared between a [`TeeStream`] and the capture side.
pub struct BodyAccumulator {
    buf: Vec<u8>,
    total: u64,
    limit: usize,
}

impl BodyAccumulator {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            total: 0,
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        if self.buf.len() < self.limit {
            let room = self.limit - self.buf.len();
            self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    /// True wire length, independent of the preview cap.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn snapshot(&self) -> (u64, Vec<u8>) {
        (self.total, self.buf.clone())
    }
}

pub type SharedAccumulator = Arc<Mutex<BodyAccumulator>>;

pub fn shared_accumulator(limit: usize) -> SharedAccumulator {
    Arc::new(Mutex::new(BodyAccumulator::new(limit)))
}

/// Pass-through stream that copies each chunk into a shared accumulator.
///
/// An optional completion sender fires exactly once when the inner stream
/// ends cleanly. A mid-stream error or an early drop (client disconnect)
/// releases the sender without firing, so the capture side observes the
/// exchange as never completed.
pub struct TeeStream<S> {
    inner: S,
    accumulator: SharedAccumulator,
    completed: Option<oneshot::Sender<()>>,
}

impl<S> TeeStream<S> {
    pub fn new(
        inner: S,
        accumulator: SharedAccumulator,
        completed: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            inner,
            accumulator,
            completed,
        }
    }
}

impl<S, E> Stream for TeeStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.accumulator.lock().unwrap().push(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                // Completion never fires for a broken stream.
                self.completed.take();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if let Some(tx) = self.completed.take() {
                    let _ = tx.send(());
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
