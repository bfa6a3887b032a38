use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::worker::SegmentResult;
use crate::error::{HlsError, HlsResult};
use crate::model::{PipelineOutcome, PipelineReport, SegmentDescriptor, SegmentProgress};
use crate::observer::ProgressObserver;
use crate::sink::SegmentSink;

/// Reorder state. Only the sequencer reads or writes it.
#[derive(Debug, Default)]
struct PipelineState {
    next_expected: usize,
    pending: BTreeMap<usize, Bytes>,
    cancelled: bool,
}

/// Single writer that turns out-of-order results into in-order sink writes.
pub(crate) struct Sequencer<'a, S: ?Sized> {
    sink: &'a mut S,
    observer: &'a dyn ProgressObserver,
    segments: &'a [SegmentDescriptor],
    window: Arc<Semaphore>,
    state: PipelineState,
    report: PipelineReport,
}

impl<'a, S> Sequencer<'a, S>
where
    S: SegmentSink + ?Sized,
{
    pub fn new(
        sink: &'a mut S,
        observer: &'a dyn ProgressObserver,
        segments: &'a [SegmentDescriptor],
        window: Arc<Semaphore>,
    ) -> Self {
        Self {
            sink,
            observer,
            segments,
            window,
            state: PipelineState::default(),
            report: PipelineReport::default(),
        }
    }

    /// Consumes results until every segment is written, a stop is observed, or a worker
    /// reports a failure.
    pub async fn run(
        mut self,
        rx: &mut mpsc::Receiver<SegmentResult>,
        cancel: &CancellationToken,
    ) -> HlsResult<PipelineOutcome> {
        let total = self.segments.len();

        while self.state.next_expected < total {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.state.cancelled = true;
                    break;
                }
                r = rx.recv() => r,
            };

            let Some(result) = received else {
                return Err(HlsError::Worker(format!(
                    "workers exited before segment {} was delivered",
                    self.state.next_expected
                )));
            };

            match result.payload {
                Ok(payload) => self.accept(result.index, payload, cancel).await?,
                Err(err) => return Err(Self::fail(result.index, err, rx, cancel)),
            }
        }

        if self.state.cancelled {
            Ok(PipelineOutcome::Stopped(self.report))
        } else {
            Ok(PipelineOutcome::Completed(self.report))
        }
    }

    async fn accept(
        &mut self,
        index: usize,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> HlsResult<()> {
        if index < self.state.next_expected || self.state.pending.contains_key(&index) {
            return Err(HlsError::DuplicateSegment { index });
        }

        if index != self.state.next_expected {
            self.state.pending.insert(index, payload);
            self.report.peak_buffered = self.report.peak_buffered.max(self.state.pending.len());
            return Ok(());
        }

        self.flush(payload).await?;

        while !cancel.is_cancelled() {
            let Some(next) = self.state.pending.remove(&self.state.next_expected) else {
                break;
            };
            self.flush(next).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, payload: Bytes) -> HlsResult<()> {
        let index = self.state.next_expected;
        let sequence = self.segments[index].sequence;

        self.sink.write_segment(sequence, &payload).await?;

        self.state.next_expected += 1;
        self.report.segments_written += 1;
        self.report.bytes_written += payload.len() as u64;
        self.window.add_permits(1);

        trace!(sequence, bytes = payload.len(), "segment written");
        self.observer.on_segment(SegmentProgress {
            sequence,
            completed: self.report.segments_written,
            total: self.segments.len(),
            buffered: self.state.pending.len(),
        });
        Ok(())
    }

    /// Stops every worker and picks the error to report: the one with the lowest index among
    /// those already delivered.
    fn fail(
        index: usize,
        err: HlsError,
        rx: &mut mpsc::Receiver<SegmentResult>,
        cancel: &CancellationToken,
    ) -> HlsError {
        cancel.cancel();
        rx.close();

        let mut first = (index, err);
        while let Ok(result) = rx.try_recv() {
            if let Err(e) = result.payload {
                if result.index < first.0 && !e.is_cancelled() {
                    first = (result.index, e);
                }
            }
        }

        warn!(index = first.0, error = %first.1, "segment failed, stopping pipeline");
        first.1
    }
}
