//! Segment/key/playlist fetching with bounded retries.
//!
//! Retry policy
//! ------------
//! - non-2xx responses fail immediately with [`HlsError::HttpStatus`];
//! - transient transport failures (reset, timeout, connect) are retried with a fixed delay
//!   until the attempt budget is spent, then surface as [`HlsError::TransientExhausted`];
//! - any other transport failure is returned as [`HlsError::Transport`] right away;
//! - the cancel token is observed while a request is in flight and while sleeping between
//!   attempts.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{HlsError, HlsResult};
use crate::settings::HlsSettings;
use crate::transport::{HttpTransport, TransportError, TransportErrorKind};

/// GET with retry-on-transient-failure semantics.
#[derive(Clone)]
pub struct SegmentFetcher {
    transport: Arc<dyn HttpTransport>,
    request_timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl SegmentFetcher {
    /// Creates a new fetcher. `max_attempts` is clamped to at least one.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        request_timeout: Duration,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            transport,
            request_timeout,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_settings(transport: Arc<dyn HttpTransport>, settings: &HlsSettings) -> Self {
        Self::new(
            transport,
            settings.request_timeout,
            settings.max_attempts,
            settings.retry_delay,
        )
    }

    /// Downloads `url` into memory.
    pub async fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> HlsResult<Bytes> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(HlsError::Cancelled);
            }

            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HlsError::Cancelled),
                res = timeout(self.request_timeout, self.transport.get(url, headers)) => res,
            };

            let err = match res {
                Ok(Ok(resp)) if resp.is_success() => {
                    if attempt > 1 {
                        debug!(
                            url = %url,
                            attempts = attempt,
                            "download succeeded after retry"
                        );
                    }
                    return Ok(resp.body);
                }
                Ok(Ok(resp)) => {
                    debug!(url = %url, status = resp.status, "non-success status");
                    return Err(HlsError::HttpStatus {
                        status: resp.status,
                        url: url.to_string(),
                    });
                }
                Ok(Err(e)) if !e.is_transient() => {
                    return Err(HlsError::Transport {
                        url: url.to_string(),
                        source: e,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => TransportError::new(
                    TransportErrorKind::Timeout,
                    format!("no response within {:?}", self.request_timeout),
                ),
            };

            debug!(
                url = %url,
                attempt = attempt,
                max_attempts = self.max_attempts,
                "download attempt failed: {}",
                err
            );

            if attempt >= self.max_attempts {
                debug!(url = %url, attempts = attempt, "download giving up after retries");
                return Err(HlsError::TransientExhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last: err,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HlsError::Cancelled),
                _ = tokio::time::sleep(self.retry_delay) => {},
            }
        }
    }
}
