//! Unified crate-level error types.
//!
//! This module provides a single [`HlsError`] type used across the crate and a
//! convenient [`HlsResult`] alias.
//!
//! Classification
//! --------------
//! The variants are grouped by how the pipeline reacts to them:
//! - playlist problems (`PlaylistUnsupported`, `InvalidPlaylist`) are detected before any
//!   segment is fetched;
//! - transport problems are either retried inside the fetcher (and surface as
//!   `TransientExhausted` once the budget is spent) or are fatal right away (`HttpStatus`,
//!   `Transport`);
//! - crypto problems (`CryptoParam`, `Padding`) are fatal for the segment and therefore for
//!   the whole run;
//! - `Cancelled` means somebody asked us to stop. It is never reported as a pipeline failure.

use std::io;

use crate::transport::TransportError;

/// Result type used by this crate.
pub type HlsResult<T> = Result<T, HlsError>;

/// Unified error type for the `hlsdl` crate.
#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    /// A generic error with a message.
    #[error("{0}")]
    Message(String),

    /// The playlist uses a feature this downloader does not handle (master playlists,
    /// discontinuities, init segment maps, SAMPLE-AES).
    #[error("unsupported playlist: {0}")]
    PlaylistUnsupported(String),

    /// The playlist document could not be parsed.
    #[error("invalid playlist: {0}")]
    InvalidPlaylist(String),

    /// Invalid parameters provided by the caller.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Server answered with a non-2xx status. Never retried.
    #[error("HTTP error: {status} for {url}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// URL that failed.
        url: String,
    },

    /// Transient network failures persisted for the whole retry budget.
    #[error("giving up on {url} after {attempts} attempts: {last}")]
    TransientExhausted {
        /// URL that failed.
        url: String,
        /// Number of attempts performed.
        attempts: u32,
        /// The error observed on the final attempt.
        last: TransportError,
    },

    /// Non-transient transport failure (malformed request, TLS setup, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        /// URL that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: TransportError,
    },

    /// Key or IV do not have the shape AES-128-CBC requires, or the ciphertext is not
    /// block aligned.
    #[error("invalid AES-128 parameters: {0}")]
    CryptoParam(String),

    /// PKCS#7 padding byte is out of range for the decrypted payload.
    #[error("invalid PKCS#7 padding length {pad} for a {len}-byte payload")]
    Padding {
        /// Value of the trailing padding byte.
        pad: u8,
        /// Length of the decrypted payload before unpadding.
        len: usize,
    },

    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error (typically from the output sink).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The sequencer received the same segment index twice.
    #[error("segment {index} was delivered more than once")]
    DuplicateSegment {
        /// Position of the segment in the descriptor list.
        index: usize,
    },

    /// A worker task terminated abnormally.
    #[error("segment worker failed: {0}")]
    Worker(String),

    /// Extra context around a lower-level error.
    #[error("{context}: {source}")]
    Context {
        /// What we were doing when the error occurred.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<HlsError>,
    },
}

impl HlsError {
    /// Convenience helper to construct a simple message error.
    pub fn msg(msg: impl Into<String>) -> Self {
        HlsError::Message(msg.into())
    }

    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        HlsError::Context {
            context,
            source: Box::new(self),
        }
    }

    pub(crate) fn invalid_aes128_key_len(len: usize) -> Self {
        HlsError::CryptoParam(format!("key must be 16 bytes, got {len}"))
    }

    /// Returns `true` when the error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            HlsError::Cancelled => true,
            HlsError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
