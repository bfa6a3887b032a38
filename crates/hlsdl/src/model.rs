//! Core data models used by the `hlsdl` crate.
//!
//! This module is focused on *pure* types, with no networking or I/O concerns.

use url::Url;

/// One media segment as handed to the pipeline by the playlist resolver.
///
/// Descriptors are produced once and never mutated afterwards. The pipeline
/// orders output by the descriptor's position in the list; `sequence` must be
/// strictly increasing along that list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Media sequence number of the segment.
    pub sequence: u64,
    /// Absolute segment URL.
    pub uri: Url,
    /// Absolute key URL when the segment is AES-128 encrypted.
    pub key_uri: Option<Url>,
    /// Explicit IV from the key declaration, if any.
    pub iv: Option<[u8; 16]>,
    /// Segment follows an `#EXT-X-DISCONTINUITY` tag.
    pub discontinuity: bool,
    /// Segment is covered by an `#EXT-X-MAP` init section.
    pub has_map: bool,
}

impl SegmentDescriptor {
    /// Plain (unencrypted) segment.
    pub fn new(sequence: u64, uri: Url) -> Self {
        Self {
            sequence,
            uri,
            key_uri: None,
            iv: None,
            discontinuity: false,
            has_map: false,
        }
    }

    /// Attach an AES-128 key (and optionally an explicit IV).
    pub fn with_key(mut self, key_uri: Url, iv: Option<[u8; 16]>) -> Self {
        self.key_uri = Some(key_uri);
        self.iv = iv;
        self
    }

    /// Resolved encryption parameters, or `None` for clear segments.
    pub fn encryption(&self) -> Option<EncryptionContext> {
        let key_url = self.key_uri.clone()?;
        let iv = match self.iv {
            Some(iv) => IvSource::Explicit(iv),
            None => IvSource::FromSequence,
        };
        Some(EncryptionContext { key_url, iv })
    }
}

/// Where the IV for a segment comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvSource {
    /// `IV=` attribute of the key tag.
    Explicit([u8; 16]),
    /// Big-endian media sequence number, left-padded with zeros.
    FromSequence,
}

/// Encryption parameters resolved for a single segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionContext {
    pub key_url: Url,
    pub iv: IvSource,
}

impl EncryptionContext {
    /// Concrete IV for a segment with the given sequence number.
    pub fn iv_for(&self, sequence: u64) -> [u8; 16] {
        match self.iv {
            IvSource::Explicit(iv) => iv,
            IvSource::FromSequence => crate::crypto::iv_from_sequence(sequence),
        }
    }
}

/// Per-segment progress, reported after every flush to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentProgress {
    /// Sequence number of the segment just written.
    pub sequence: u64,
    /// Segments written so far.
    pub completed: usize,
    /// Segments in the run.
    pub total: usize,
    /// Results currently parked in the reorder buffer.
    pub buffered: usize,
}

/// Statistics for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub segments_written: usize,
    pub bytes_written: u64,
    /// High-water mark of the reorder buffer.
    pub peak_buffered: usize,
}

/// How a pipeline run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every segment was written.
    Completed(PipelineReport),
    /// A stop was requested; the sink holds a contiguous prefix of the segments.
    Stopped(PipelineReport),
}

impl PipelineOutcome {
    pub fn report(&self) -> &PipelineReport {
        match self {
            PipelineOutcome::Completed(r) | PipelineOutcome::Stopped(r) => r,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PipelineOutcome::Stopped(_))
    }
}
