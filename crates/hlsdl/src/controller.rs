//! Download orchestration.
//!
//! [`Controller`] wires settings, transport, key cache, fetcher, decryptor and pipeline
//! together, validates the segment list and exposes a cooperative stop.
//!
//! A controller owns one stop token for its whole lifetime. Once [`Controller::stop`] has been
//! called, every current and future run on that controller ends as
//! [`PipelineOutcome::Stopped`]; build a new controller (optionally sharing the key cache)
//! to download again.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::cache::KeyCache;
use crate::crypto::SegmentDecryptor;
use crate::downloader::SegmentFetcher;
use crate::error::{HlsError, HlsResult};
use crate::model::{PipelineOutcome, PipelineReport, SegmentDescriptor};
use crate::observer::ProgressObserver;
use crate::parser::resolve_playlist;
use crate::pipeline::OrderedPipeline;
use crate::settings::HlsSettings;
use crate::sink::SegmentSink;
use crate::transport::{HttpTransport, ReqwestTransport, header_map};

pub struct Controller {
    settings: HlsSettings,
    transport: Arc<dyn HttpTransport>,
    keys: Arc<KeyCache>,
    stop: CancellationToken,
}

impl Controller {
    /// Controller backed by a `reqwest` client.
    pub fn new(settings: HlsSettings) -> HlsResult<Self> {
        let transport = ReqwestTransport::new(settings.request_timeout)?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    /// Controller over an injected transport.
    pub fn with_transport(settings: HlsSettings, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            settings,
            transport,
            keys: Arc::new(KeyCache::new()),
            stop: CancellationToken::new(),
        }
    }

    /// Share a key cache with other controllers.
    pub fn with_key_cache(mut self, keys: Arc<KeyCache>) -> Self {
        self.keys = keys;
        self
    }

    pub fn settings(&self) -> &HlsSettings {
        &self.settings
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Requests a cooperative stop. Idempotent, non-blocking, callable from any task.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!("stop requested");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    fn fetcher(&self) -> SegmentFetcher {
        SegmentFetcher::from_settings(self.transport.clone(), &self.settings)
    }

    fn pipeline(&self) -> HlsResult<OrderedPipeline> {
        let fetcher = self.fetcher();
        let decryptor =
            SegmentDecryptor::from_settings(self.keys.clone(), fetcher.clone(), &self.settings)?;
        let headers = header_map(&self.settings.segment_headers)?;
        Ok(OrderedPipeline::new(
            fetcher,
            decryptor,
            headers,
            self.settings.resolved_workers(),
        ))
    }

    /// Launches the pipeline on a background task and returns immediately.
    ///
    /// Must be called from within a tokio runtime; otherwise `InvalidParams` is returned.
    pub fn start<S>(
        &self,
        segments: Vec<SegmentDescriptor>,
        sink: S,
        observer: Arc<dyn ProgressObserver>,
    ) -> HlsResult<DownloadHandle>
    where
        S: SegmentSink + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            HlsError::InvalidParams(format!("start requires a tokio runtime: {e}"))
        })?;
        validate_segments(&segments)?;
        let pipeline = self.pipeline()?;
        let stop = self.stop.clone();
        let segments: Arc<[SegmentDescriptor]> = segments.into();

        debug!(
            segments = segments.len(),
            workers = pipeline.workers(),
            "starting download"
        );
        let task = runtime.spawn(async move {
            let mut sink = sink;
            pipeline
                .run(segments, &mut sink, observer.as_ref(), &stop)
                .await
        });

        Ok(DownloadHandle {
            task,
            stop: self.stop.clone(),
        })
    }

    /// Runs the pipeline on the current task until it finishes.
    pub async fn run<S>(
        &self,
        segments: Vec<SegmentDescriptor>,
        sink: &mut S,
        observer: &dyn ProgressObserver,
    ) -> HlsResult<PipelineOutcome>
    where
        S: SegmentSink + ?Sized,
    {
        validate_segments(&segments)?;
        let pipeline = self.pipeline()?;
        pipeline.run(segments.into(), sink, observer, &self.stop).await
    }

    /// Fetches and parses the media playlist at `url`.
    pub async fn resolve(&self, url: &Url) -> HlsResult<Vec<SegmentDescriptor>> {
        let headers = header_map(&self.settings.playlist_headers)?;
        resolve_playlist(&self.fetcher(), url, &headers, &self.stop).await
    }

    /// Resolves the playlist at `url` and downloads every segment into `sink`.
    pub async fn download<S>(
        &self,
        url: &Url,
        sink: &mut S,
        observer: &dyn ProgressObserver,
    ) -> HlsResult<PipelineOutcome>
    where
        S: SegmentSink + ?Sized,
    {
        let segments = match self.resolve(url).await {
            Err(e) if e.is_cancelled() => {
                sink.close().await?;
                return Ok(PipelineOutcome::Stopped(PipelineReport::default()));
            }
            res => res?,
        };
        info!(url = %url, segments = segments.len(), "playlist resolved");
        self.run(segments, sink, observer).await
    }
}

/// Rejects lists the pipeline cannot turn into one continuous stream.
pub fn validate_segments(segments: &[SegmentDescriptor]) -> HlsResult<()> {
    for s in segments {
        if s.discontinuity {
            return Err(HlsError::PlaylistUnsupported(format!(
                "discontinuity before segment {}",
                s.sequence
            )));
        }
        if s.has_map {
            return Err(HlsError::PlaylistUnsupported(format!(
                "init section (EXT-X-MAP) on segment {}",
                s.sequence
            )));
        }
    }
    if let Some(w) = segments.windows(2).find(|w| w[1].sequence <= w[0].sequence) {
        return Err(HlsError::InvalidParams(format!(
            "segment sequence numbers must increase: {} followed by {}",
            w[0].sequence, w[1].sequence
        )));
    }
    Ok(())
}

/// Handle to a download started with [`Controller::start`].
pub struct DownloadHandle {
    task: JoinHandle<HlsResult<PipelineOutcome>>,
    stop: CancellationToken,
}

impl DownloadHandle {
    /// Same as [`Controller::stop`].
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Waits for the run to finish.
    pub async fn wait(self) -> HlsResult<PipelineOutcome> {
        self.task
            .await
            .map_err(|e| HlsError::Worker(format!("pipeline task failed: {e}")))?
    }
}
