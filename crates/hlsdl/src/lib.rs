//! Concurrent HLS downloader.
//!
//! Fetches the segments of an HLS media playlist with a pool of workers,
//! decrypts AES-128 segments, and writes one strictly ordered output stream.
//!
//! This crate is composed of several modules:
//! - `parser`: media playlist parsing into [`SegmentDescriptor`]s (via `hls_m3u8`).
//! - `transport`: the injectable HTTP seam and its `reqwest` implementation.
//! - `downloader`: [`SegmentFetcher`], a GET with bounded retries and cancellation.
//! - `cache`: [`KeyCache`], single-flight AES key caching.
//! - `crypto`: [`SegmentDecryptor`] and the AES-128-CBC/PKCS#7 helpers.
//! - `pipeline`: [`OrderedPipeline`], worker pool plus in-order sequencer.
//! - `controller`: [`Controller`], the high-level entry point with cooperative stop.
//! - `sink` / `observer`: output and progress hooks.
//! - `settings` / `error`: configuration and the unified error type.
//!
//! This file (`lib.rs`) acts as a facade: it re-exports the main
//! types and functions from the internal modules to form the public API.

mod cache;
mod controller;
mod crypto;
mod downloader;
mod error;
mod model;
mod observer;
mod parser;
mod pipeline;
mod settings;
mod sink;
mod transport;


pub use crate::cache::KeyCache;
pub use crate::controller::{Controller, DownloadHandle, validate_segments};
pub use crate::crypto::{
    KeyProcessorCallback, SegmentDecryptor, TS_SYNC_BYTE, aes128_cbc_decrypt, align_to_sync_byte,
    iv_from_sequence, pkcs7_unpad,
};
pub use crate::downloader::SegmentFetcher;
pub use crate::error::{HlsError, HlsResult};
pub use crate::model::{
    EncryptionContext, IvSource, PipelineOutcome, PipelineReport, SegmentDescriptor,
    SegmentProgress,
};
pub use crate::observer::{NoopObserver, ProgressObserver};
pub use crate::parser::{parse_media_playlist, resolve_playlist};
pub use crate::pipeline::OrderedPipeline;
pub use crate::settings::HlsSettings;
pub use crate::sink::{MemorySink, SegmentSink, WriterSink};
pub use crate::transport::{
    HttpResponse, HttpTransport, ReqwestTransport, TransportError, TransportErrorKind, header_map,
};

// Re-exported so callers can build header maps and URLs without extra dependencies.
pub use reqwest::header::HeaderMap;
pub use tokio_util::sync::CancellationToken;
pub use url::Url;
