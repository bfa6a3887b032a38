//! Local HLS fixture server for the `hlsdl` integration tests.
//!
//! Serves one media playlist, an optional AES-128 key and a set of
//! transport-stream-shaped segments from memory. Segment payloads are
//! deterministic, so tests can compare the downloaded output byte-for-byte
//! with [`HlsFixture::expected_output`].
//!
//! Knobs:
//! - encryption on/off (IV derived from the media sequence number, no `IV=` attribute)
//! - per-segment artificial latency
//! - per-segment HTTP status override
//!
//! Every request is counted by path (including 404s), and the headers of the
//! last request per path are recorded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aes::Aes128;
use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use bytes::Bytes;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use url::Url;

pub const PLAYLIST_PATH: &str = "index.m3u8";
pub const KEY_PATH: &str = "key.bin";

const TS_PACKET_LEN: usize = 188;
const FIXTURE_KEY: [u8; 16] = *b"hlsdl-fixture-k1";

type RequestLog = Arc<Mutex<HashMap<String, (u64, HeaderMap)>>>;

#[derive(Clone)]
pub struct HlsFixture {
    segment_count: usize,
    media_sequence: u64,
    packets_per_segment: usize,
    encrypted: bool,
    delays: HashMap<usize, Duration>,
    statuses: HashMap<usize, u16>,
    requests: RequestLog,
}

impl HlsFixture {
    pub fn new(segment_count: usize) -> Self {
        Self {
            segment_count,
            media_sequence: 0,
            packets_per_segment: 4,
            encrypted: false,
            delays: HashMap::new(),
            statuses: HashMap::new(),
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn encrypted(mut self, on: bool) -> Self {
        self.encrypted = on;
        self
    }

    pub fn media_sequence(mut self, first: u64) -> Self {
        self.media_sequence = first;
        self
    }

    pub fn packets_per_segment(mut self, n: usize) -> Self {
        self.packets_per_segment = n.max(1);
        self
    }

    /// Delay the response for segment `index` (position in the playlist).
    pub fn segment_delay(mut self, index: usize, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    /// Same delay for every segment.
    pub fn uniform_delay(mut self, delay: Duration) -> Self {
        for i in 0..self.segment_count {
            self.delays.insert(i, delay);
        }
        self
    }

    /// Answer requests for segment `index` with `status` and an empty body.
    pub fn segment_status(mut self, index: usize, status: u16) -> Self {
        self.statuses.insert(index, status);
        self
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn segment_path(index: usize) -> String {
        format!("seg/{index}.ts")
    }

    /// Plaintext of segment `index`: whole 188-byte packets, each starting with the sync byte.
    pub fn segment_plaintext(&self, index: usize) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(index as u64);
        let mut out = vec![0u8; self.packets_per_segment * TS_PACKET_LEN];
        for packet in out.chunks_mut(TS_PACKET_LEN) {
            rng.fill_bytes(packet);
            packet[0] = hlsdl::TS_SYNC_BYTE;
            packet[1] = (index & 0xff) as u8;
        }
        out
    }

    pub fn expected_output(&self) -> Vec<u8> {
        (0..self.segment_count)
            .flat_map(|i| self.segment_plaintext(i))
            .collect()
    }

    pub fn playlist(&self) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n");
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));
        if self.encrypted {
            out.push_str(&format!("#EXT-X-KEY:METHOD=AES-128,URI=\"{KEY_PATH}\"\n"));
        }
        for i in 0..self.segment_count {
            out.push_str("#EXTINF:4.0,\n");
            out.push_str(&Self::segment_path(i));
            out.push('\n');
        }
        out.push_str("#EXT-X-ENDLIST\n");
        out
    }

    /// Number of requests seen for `path` (relative to the server root, no leading slash).
    pub fn request_count(&self, path: &str) -> u64 {
        self.requests
            .lock()
            .ok()
            .and_then(|log| log.get(path).map(|(count, _)| *count))
            .unwrap_or(0)
    }

    pub fn segment_requests(&self) -> u64 {
        (0..self.segment_count)
            .map(|i| self.request_count(&Self::segment_path(i)))
            .sum()
    }

    pub fn last_headers(&self, path: &str) -> Option<HeaderMap> {
        self.requests
            .lock()
            .ok()
            .and_then(|log| log.get(path).map(|(_, headers)| headers.clone()))
    }

    /// Start the fixture server and return the playlist URL.
    ///
    /// Binds a `std::net::TcpListener` on `127.0.0.1:0`, hands it to tokio and
    /// spawns `axum::serve` in the background. Must be called inside a runtime.
    pub async fn start(&self) -> Url {
        let app = self.build_router();

        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .expect("failed to bind local fixture server");
        listener
            .set_nonblocking(true)
            .expect("failed to set nonblocking on fixture listener");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener)
                .expect("failed to convert fixture listener to tokio listener");
            axum::serve(listener, app).await.unwrap();
        });

        Url::parse(&format!("http://{addr}/{PLAYLIST_PATH}")).expect("failed to build playlist url")
    }

    fn build_blobs(&self) -> HashMap<String, Bytes> {
        let mut blobs = HashMap::new();
        blobs.insert(PLAYLIST_PATH.to_string(), Bytes::from(self.playlist()));
        if self.encrypted {
            blobs.insert(KEY_PATH.to_string(), Bytes::from_static(&FIXTURE_KEY));
        }
        for i in 0..self.segment_count {
            let plain = self.segment_plaintext(i);
            let body = if self.encrypted {
                let iv = hlsdl::iv_from_sequence(self.media_sequence + i as u64);
                cbc::Encryptor::<Aes128>::new(&FIXTURE_KEY.into(), &iv.into())
                    .encrypt_padded_vec_mut::<Pkcs7>(&plain)
            } else {
                plain
            };
            blobs.insert(Self::segment_path(i), Bytes::from(body));
        }
        blobs
    }

    fn build_router(&self) -> Router {
        #[derive(Clone)]
        struct Shared {
            blobs: Arc<HashMap<String, Bytes>>,
            delays: Arc<HashMap<String, Duration>>,
            statuses: Arc<HashMap<String, u16>>,
            requests: RequestLog,
        }

        async fn serve_blob(path: String, headers: HeaderMap, shared: Shared) -> impl IntoResponse {
            if let Ok(mut log) = shared.requests.lock() {
                let entry = log.entry(path.clone()).or_insert((0, HeaderMap::new()));
                entry.0 += 1;
                entry.1 = headers;
            }

            if let Some(delay) = shared.delays.get(&path) {
                tokio::time::sleep(*delay).await;
            }

            if let Some(status) = shared.statuses.get(&path) {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                return (status, HeaderMap::new(), Bytes::new());
            }

            let Some(bytes) = shared.blobs.get(&path) else {
                return (StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new());
            };

            let mut out = HeaderMap::new();
            out.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static(if path.ends_with(".m3u8") {
                    "application/vnd.apple.mpegurl"
                } else {
                    "application/octet-stream"
                }),
            );
            (StatusCode::OK, out, bytes.clone())
        }

        fn by_index<T: Copy>(map: &HashMap<usize, T>) -> HashMap<String, T> {
            map.iter()
                .map(|(i, v)| (HlsFixture::segment_path(*i), *v))
                .collect()
        }

        let shared = Shared {
            blobs: Arc::new(self.build_blobs()),
            delays: Arc::new(by_index(&self.delays)),
            statuses: Arc::new(by_index(&self.statuses)),
            requests: self.requests.clone(),
        };

        // "/seg/{name}" maps to "seg/<name>", "/{path}" serves the playlist and key.
        Router::new()
            .route(
                "/seg/{name}",
                get({
                    let shared = shared.clone();
                    move |Path(name): Path<String>, headers: HeaderMap| {
                        serve_blob(format!("seg/{name}"), headers, shared.clone())
                    }
                }),
            )
            .route(
                "/{path}",
                get(move |Path(path): Path<String>, headers: HeaderMap| {
                    serve_blob(path, headers, shared.clone())
                }),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_is_packetized() {
        let fx = HlsFixture::new(3).packets_per_segment(2);
        let seg = fx.segment_plaintext(1);
        assert_eq!(seg.len(), 2 * TS_PACKET_LEN);
        assert_eq!(seg[0], hlsdl::TS_SYNC_BYTE);
        assert_eq!(seg[TS_PACKET_LEN], hlsdl::TS_SYNC_BYTE);
        assert_eq!(fx.expected_output().len(), 3 * 2 * TS_PACKET_LEN);
    }

    #[test]
    fn encrypted_playlist_declares_key() {
        let pl = HlsFixture::new(2).media_sequence(5).encrypted(true).playlist();
        assert!(pl.contains("#EXT-X-MEDIA-SEQUENCE:5"));
        assert!(pl.contains("METHOD=AES-128,URI=\"key.bin\""));
        assert!(pl.contains("seg/1.ts"));
    }
}
