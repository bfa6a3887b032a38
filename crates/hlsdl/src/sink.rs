//! Output sinks.
//!
//! The sequencer is the only writer, so sinks need no internal locking for correctness.
//! A segment is handed over as one slice; implementations write it completely or fail.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Destination for decrypted segments, in playback order.
#[async_trait]
pub trait SegmentSink: Send {
    /// Append one segment's plaintext.
    async fn write_segment(&mut self, sequence: u64, data: &[u8]) -> io::Result<()>;

    /// Flush and release the destination. Called once when the run ends.
    async fn close(&mut self) -> io::Result<()>;
}

/// Sink over any async writer (file, pipe, socket).
#[derive(Debug)]
pub struct WriterSink<W> {
    inner: W,
}

impl<W> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W> SegmentSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_segment(&mut self, _sequence: u64, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.flush().await?;
        self.inner.shutdown().await
    }
}

/// In-memory sink. Clones share the same buffer, so a test can keep one handle while the
/// pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
    sequences: Arc<Mutex<Vec<u64>>>,
    closed: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Sequence numbers in write order.
    pub fn sequences(&self) -> Vec<u64> {
        self.sequences.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl SegmentSink for MemorySink {
    async fn write_segment(&mut self, sequence: u64, data: &[u8]) -> io::Result<()> {
        if *self.closed.lock() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.data.lock().extend_from_slice(data);
        self.sequences.lock().push(sequence);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

#[async_trait]
impl<S: SegmentSink + ?Sized> SegmentSink for Box<S> {
    async fn write_segment(&mut self, sequence: u64, data: &[u8]) -> io::Result<()> {
        (**self).write_segment(sequence, data).await
    }

    async fn close(&mut self) -> io::Result<()> {
        (**self).close().await
    }
}
