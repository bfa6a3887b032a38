//! Unified configuration for the `hlsdl` crate.
//!
//! Included configuration domains:
//! - pipeline sizing (worker count)
//! - HTTP fetch behavior (per-attempt timeout, retry budget, fixed backoff)
//! - request headers (playlist, segments, keys)
//! - key handling (query parameters, post-processing callback)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::crypto::KeyProcessorCallback;

/// Unified settings for a download run.
#[derive(Clone)]
pub struct HlsSettings {
    // ----------------------------
    // Pipeline
    // ----------------------------
    /// Number of concurrent segment workers.
    /// `0` selects the number of logical cores.
    /// Default: 0.
    pub workers: usize,

    // ----------------------------
    // HTTP fetch
    // ----------------------------
    /// Timeout for a single HTTP attempt. Expiry counts as a transient failure.
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Total number of attempts for a request that keeps failing transiently.
    /// Default: 3.
    pub max_attempts: u32,

    /// Fixed delay between two attempts.
    /// Default: 1 second.
    pub retry_delay: Duration,

    // ----------------------------
    // Headers
    // ----------------------------
    /// Headers sent with the playlist request.
    pub playlist_headers: HashMap<String, String>,

    /// Headers sent with every segment request.
    pub segment_headers: HashMap<String, String>,

    /// Headers sent with key requests. `None` reuses `segment_headers`.
    pub key_request_headers: Option<HashMap<String, String>>,

    // ----------------------------
    // Keys
    // ----------------------------
    /// Optional query parameters appended to key URLs. The extended URL is also the cache key.
    pub key_query_params: Option<HashMap<String, String>>,

    /// Optional callback to post-process fetched AES keys before use (e.g., unwrap DRM).
    ///
    /// Not included in Debug output.
    pub key_processor_cb: Option<Arc<Box<KeyProcessorCallback>>>,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            workers: 0,

            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),

            playlist_headers: HashMap::new(),
            segment_headers: HashMap::new(),
            key_request_headers: None,

            key_query_params: None,
            key_processor_cb: None,
        }
    }
}

impl fmt::Debug for HlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print `key_processor_cb` to keep Debug output clean.
        f.debug_struct("HlsSettings")
            .field("workers", &self.workers)
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("playlist_headers", &self.playlist_headers)
            .field("segment_headers", &self.segment_headers)
            .field("key_request_headers", &self.key_request_headers)
            .field("key_query_params", &self.key_query_params)
            .field("has_key_processor_cb", &self.key_processor_cb.is_some())
            .finish()
    }
}

impl HlsSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective worker count: the configured value, or the number of logical cores when unset.
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Headers used for key requests.
    pub fn effective_key_headers(&self) -> &HashMap<String, String> {
        self.key_request_headers
            .as_ref()
            .unwrap_or(&self.segment_headers)
    }

    // -------------------------
    // Pipeline setters
    // -------------------------

    pub fn workers(mut self, v: usize) -> Self {
        self.workers = v;
        self
    }

    // -------------------------
    // Fetch setters
    // -------------------------

    pub fn request_timeout(mut self, v: Duration) -> Self {
        self.request_timeout = v;
        self
    }

    pub fn max_attempts(mut self, v: u32) -> Self {
        self.max_attempts = v;
        self
    }

    pub fn retry_delay(mut self, v: Duration) -> Self {
        self.retry_delay = v;
        self
    }

    // -------------------------
    // Header setters
    // -------------------------

    /// Use the same header set for the playlist and every segment.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.playlist_headers = headers.clone();
        self.segment_headers = headers;
        self
    }

    pub fn playlist_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.playlist_headers = headers;
        self
    }

    pub fn segment_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.segment_headers = headers;
        self
    }

    pub fn key_request_headers(mut self, headers: Option<HashMap<String, String>>) -> Self {
        self.key_request_headers = headers;
        self
    }

    // -------------------------
    // Key setters
    // -------------------------

    pub fn key_query_params(mut self, params: Option<HashMap<String, String>>) -> Self {
        self.key_query_params = params;
        self
    }

    pub fn key_processor_cb(mut self, cb: Option<Arc<Box<KeyProcessorCallback>>>) -> Self {
        self.key_processor_cb = cb;
        self
    }
}
