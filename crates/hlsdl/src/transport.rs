//! HTTP transport seam.
//!
//! The pipeline never talks to `reqwest` directly: every request goes through
//! [`HttpTransport`], so tests can inject latency, failures and status codes
//! without a network.

use std::collections::HashMap;
use std::error::Error as _;
use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::{HlsError, HlsResult};

/// Status and body of a completed GET.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Coarse classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The peer dropped the connection (reset, abort, truncated body).
    ConnectionReset,
    /// No response within the allotted time.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// Anything else; never retried.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::ConnectionReset => "connection reset",
            TransportErrorKind::Timeout => "timed out",
            TransportErrorKind::Connect => "connect failed",
            TransportErrorKind::Other => "request failed",
        };
        f.write_str(s)
    }
}

/// Network-level failure reported by an [`HttpTransport`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the fetcher may retry after this error.
    pub fn is_transient(&self) -> bool {
        !matches!(self.kind, TransportErrorKind::Other)
    }
}

/// Minimal GET capability consumed by the fetcher.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue one GET. Non-2xx statuses are returned as responses, not errors.
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with connection pooling and the given connect timeout.
    pub fn new(connect_timeout: Duration) -> HlsResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| HlsError::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify_reqwest_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || has_reset_io_source(&err) {
        TransportErrorKind::ConnectionReset
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, err.to_string())
}

fn has_reset_io_source(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            );
        }
        source = e.source();
    }
    false
}

/// Convert user supplied header pairs into a validated [`HeaderMap`].
pub fn header_map(headers: &HashMap<String, String>) -> HlsResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.trim().as_bytes())
            .map_err(|e| HlsError::InvalidParams(format!("invalid header name `{k}`: {e}")))?;
        let value = HeaderValue::from_str(v.trim())
            .map_err(|e| HlsError::InvalidParams(format!("invalid header value for `{k}`: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}
