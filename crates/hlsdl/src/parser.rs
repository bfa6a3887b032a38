//! Playlist parser module.
//!
//! Adapter around the `hls_m3u8` crate that turns a media playlist into the
//! ordered list of [`SegmentDescriptor`]s the pipeline consumes.
//!
//! `hls_m3u8` resolves key inheritance (a key applies until the next `#EXT-X-KEY`,
//! `METHOD=NONE` clears it). Tags this downloader refuses to handle (master playlists,
//! `SAMPLE-AES`) and the per-segment discontinuity/map flags come from a line scan of
//! the raw document.

use hls_m3u8::Decryptable;
use hls_m3u8::MediaPlaylist as HlsMediaPlaylist;
use hls_m3u8::types::InitializationVector;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::downloader::SegmentFetcher;
use crate::error::{HlsError, HlsResult};
use crate::model::SegmentDescriptor;

#[derive(Debug, Clone, Copy, Default)]
struct SegmentFlags {
    discontinuity: bool,
    has_map: bool,
}

/// Line scan over the raw playlist. Returns one entry per media segment URI.
fn scan_segment_flags(input: &str) -> HlsResult<Vec<SegmentFlags>> {
    let mut flags = Vec::new();
    let mut pending_discontinuity = false;
    let mut map_active = false;

    for line in input.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if line.starts_with("#EXT-X-STREAM-INF") || line.starts_with("#EXT-X-I-FRAME-STREAM-INF") {
            return Err(HlsError::PlaylistUnsupported(
                "master playlists are not supported, pass a media playlist URL".into(),
            ));
        }
        if line.starts_with("#EXT-X-KEY") && line.contains("METHOD=SAMPLE-AES") {
            return Err(HlsError::PlaylistUnsupported(
                "SAMPLE-AES encryption is not supported".into(),
            ));
        }
        if line == "#EXT-X-DISCONTINUITY" {
            pending_discontinuity = true;
        } else if line.starts_with("#EXT-X-MAP") {
            map_active = true;
        } else if !line.starts_with('#') {
            flags.push(SegmentFlags {
                discontinuity: pending_discontinuity,
                has_map: map_active,
            });
            pending_discontinuity = false;
        }
    }

    Ok(flags)
}

/// Only an `IV=` attribute counts as explicit. `hls_m3u8` fills a missing IV with
/// the segment number, which the decryptor derives itself.
fn explicit_iv(iv: &InitializationVector) -> Option<[u8; 16]> {
    match iv {
        InitializationVector::Aes128(bytes) => Some(*bytes),
        _ => None,
    }
}

fn resolve_uri(base: &Url, uri: &str) -> HlsResult<Url> {
    base.join(uri)
        .map_err(|e| HlsError::InvalidPlaylist(format!("invalid URI `{uri}`: {e}")))
}

/// Parse a media playlist (M3U8) into segment descriptors with absolute URIs.
pub fn parse_media_playlist(data: &[u8], base_url: &Url) -> HlsResult<Vec<SegmentDescriptor>> {
    let input = std::str::from_utf8(data)
        .map_err(|e| HlsError::InvalidPlaylist(format!("invalid UTF-8: {}", e)))?;

    let flags = scan_segment_flags(input)?;

    let hls_media = HlsMediaPlaylist::try_from(input)
        .map_err(|e| HlsError::InvalidPlaylist(format!("hls_m3u8 parse error: {}", e)))?
        .into_owned();

    let media_sequence = hls_media.media_sequence as u64;

    let parsed = hls_media.segments.iter().count();
    if flags.len() != parsed {
        return Err(HlsError::InvalidPlaylist(format!(
            "found {} segment URIs but parsed {} segments",
            flags.len(),
            parsed
        )));
    }

    let segments = hls_media
        .segments
        .iter()
        .zip(flags)
        .enumerate()
        .map(|(index, ((_idx, seg), flags))| {
            let mut desc = SegmentDescriptor::new(
                media_sequence + index as u64,
                resolve_uri(base_url, seg.uri())?,
            );
            if let Some(k) = seg.keys().first() {
                desc = desc.with_key(resolve_uri(base_url, k.uri())?, explicit_iv(&k.iv));
            }
            desc.discontinuity = flags.discontinuity;
            desc.has_map = flags.has_map;
            Ok(desc)
        })
        .collect::<HlsResult<Vec<_>>>()?;

    debug!(
        segments = segments.len(),
        media_sequence,
        encrypted = segments.iter().filter(|s| s.key_uri.is_some()).count(),
        "media playlist parsed"
    );
    Ok(segments)
}

/// Downloads and parses the media playlist at `url`.
#[instrument(skip(fetcher, headers, cancel), fields(url = %url))]
pub async fn resolve_playlist(
    fetcher: &SegmentFetcher,
    url: &Url,
    headers: &HeaderMap,
    cancel: &CancellationToken,
) -> HlsResult<Vec<SegmentDescriptor>> {
    let body = fetcher
        .fetch(url, headers, cancel)
        .await
        .map_err(|e| e.with_context("fetching playlist"))?;
    parse_media_playlist(&body, url)
}
