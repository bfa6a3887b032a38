//! Ordered concurrent segment pipeline.
//!
//! Overview
//! --------
//! `W` worker tasks pull segment indices from a shared cursor, fetch and decrypt them, and
//! send the results over a bounded channel. A single sequencer (running on the caller's task)
//! parks early results in a reorder buffer and writes segments to the sink strictly in list
//! order.
//!
//! Admission window
//! ----------------
//! A worker must take a permit from a `W`-permit semaphore before claiming an index. The
//! permit is released by the sequencer only when a segment is written, so at most `W`
//! segments are claimed but unwritten at any time and the reorder buffer never holds more
//! than `W - 1` entries.
//!
//! Cancellation
//! ------------
//! The run uses a child of the caller's stop token. A stop ends the run with
//! [`PipelineOutcome::Stopped`] after the already written prefix; a segment failure cancels
//! the child token, so the remaining workers stop and the failure is returned.
//! In both cases every worker is joined and the sink is closed before `run` returns.

mod sequencer;
mod worker;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use reqwest::header::HeaderMap;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use self::sequencer::Sequencer;
use self::worker::{SegmentWorker, WorkerShared};
use crate::crypto::SegmentDecryptor;
use crate::downloader::SegmentFetcher;
use crate::error::{HlsError, HlsResult};
use crate::model::{PipelineOutcome, PipelineReport, SegmentDescriptor};
use crate::observer::ProgressObserver;
use crate::sink::SegmentSink;

/// Fetch+decrypt worker pool with an in-order writer.
#[derive(Clone)]
pub struct OrderedPipeline {
    fetcher: SegmentFetcher,
    decryptor: SegmentDecryptor,
    headers: HeaderMap,
    workers: usize,
}

impl OrderedPipeline {
    /// `workers` is clamped to `1..=segments.len()` at run time.
    pub fn new(
        fetcher: SegmentFetcher,
        decryptor: SegmentDecryptor,
        headers: HeaderMap,
        workers: usize,
    ) -> Self {
        Self {
            fetcher,
            decryptor,
            headers,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Downloads `segments` into `sink`, in order.
    #[instrument(skip_all, fields(segments = segments.len()))]
    pub async fn run<S>(
        &self,
        segments: Arc<[SegmentDescriptor]>,
        sink: &mut S,
        observer: &dyn ProgressObserver,
        stop: &CancellationToken,
    ) -> HlsResult<PipelineOutcome>
    where
        S: SegmentSink + ?Sized,
    {
        let total = segments.len();
        if total == 0 {
            sink.close().await?;
            return Ok(PipelineOutcome::Completed(PipelineReport::default()));
        }

        let workers = self.workers.clamp(1, total);
        let cancel = stop.child_token();
        let window = Arc::new(Semaphore::new(workers));
        let (tx, mut rx) = mpsc::channel(workers);

        let shared = Arc::new(WorkerShared {
            segments: segments.clone(),
            fetcher: self.fetcher.clone(),
            decryptor: self.decryptor.clone(),
            headers: self.headers.clone(),
            cursor: AtomicUsize::new(0),
            window: window.clone(),
        });

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let worker = SegmentWorker {
                id,
                shared: shared.clone(),
                tx: tx.clone(),
                cancel: cancel.clone(),
            };
            tasks.spawn(worker.run());
        }
        drop(tx);
        info!(total, workers, "pipeline started");

        let outcome = Sequencer::new(&mut *sink, observer, &segments, window)
            .run(&mut rx, &cancel)
            .await;

        cancel.cancel();
        drop(rx);
        let joined = join_workers(&mut tasks).await;
        let closed = sink.close().await;

        match (outcome, joined) {
            (Ok(outcome), Ok(())) => {
                closed?;
                let report = outcome.report();
                if outcome.is_stopped() {
                    info!(
                        written = report.segments_written,
                        total, "pipeline stopped on request"
                    );
                } else {
                    info!(
                        written = report.segments_written,
                        bytes = report.bytes_written,
                        peak_buffered = report.peak_buffered,
                        "pipeline finished"
                    );
                }
                Ok(outcome)
            }
            (Ok(_), Err(err)) | (Err(err), _) => {
                if let Err(e) = closed {
                    warn!(error = %e, "failed to close sink after pipeline failure");
                }
                warn!(error = %err, "pipeline failed");
                Err(err)
            }
        }
    }
}

async fn join_workers(tasks: &mut JoinSet<()>) -> HlsResult<()> {
    let mut first_err = None;
    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            if first_err.is_none() {
                first_err = Some(HlsError::Worker(e.to_string()));
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}
