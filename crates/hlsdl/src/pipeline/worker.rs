use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures_util::FutureExt;
use reqwest::header::HeaderMap;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::crypto::SegmentDecryptor;
use crate::downloader::SegmentFetcher;
use crate::error::{HlsError, HlsResult};
use crate::model::SegmentDescriptor;

/// Unit handed from a worker to the sequencer.
#[derive(Debug)]
pub(crate) struct SegmentResult {
    /// Position in the descriptor list.
    pub index: usize,
    pub sequence: u64,
    pub payload: HlsResult<Bytes>,
}

/// State shared by every worker of one run.
pub(crate) struct WorkerShared {
    pub segments: Arc<[SegmentDescriptor]>,
    pub fetcher: SegmentFetcher,
    pub decryptor: SegmentDecryptor,
    pub headers: HeaderMap,
    /// Next unclaimed index.
    pub cursor: AtomicUsize,
    /// One permit per segment that may be claimed but not yet written.
    pub window: Arc<Semaphore>,
}

impl WorkerShared {
    async fn process(
        &self,
        segment: &SegmentDescriptor,
        cancel: &CancellationToken,
    ) -> HlsResult<Bytes> {
        let body = self.fetcher.fetch(&segment.uri, &self.headers, cancel).await?;
        self.decryptor.decrypt(segment, body, cancel).await
    }
}

pub(crate) struct SegmentWorker {
    pub id: usize,
    pub shared: Arc<WorkerShared>,
    pub tx: mpsc::Sender<SegmentResult>,
    pub cancel: CancellationToken,
}

impl SegmentWorker {
    pub async fn run(self) {
        let shared = &self.shared;
        let mut processed = 0usize;
        debug!(worker = self.id, "segment worker started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = shared.window.acquire() => permit,
            };
            let Ok(permit) = permit else { break };
            // Returned by the sequencer once the claimed segment is written.
            permit.forget();

            let index = shared.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(segment) = shared.segments.get(index) else {
                break;
            };

            trace!(worker = self.id, sequence = segment.sequence, "segment claimed");
            let payload = AssertUnwindSafe(shared.process(segment, &self.cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(HlsError::Worker(format!(
                        "panic while processing segment {}",
                        segment.sequence
                    )))
                });

            if matches!(&payload, Err(e) if e.is_cancelled()) {
                break;
            }
            let failed = payload.is_err();

            let result = SegmentResult {
                index,
                sequence: segment.sequence,
                payload,
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = self.tx.send(result) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }

            if failed {
                break;
            }
            processed += 1;
        }

        debug!(worker = self.id, processed, "segment worker stopped");
    }
}
