//! AES-128 segment decryption.
//!
//! A segment is decrypted as a whole:
//! 1. clear segments (no key) pass through untouched;
//! 2. the key is resolved through the shared [`KeyCache`];
//! 3. the IV is either explicit or derived from the media sequence number;
//! 4. AES-128-CBC without streaming, so the ciphertext must be block aligned;
//! 5. PKCS#7 padding is validated and stripped;
//! 6. leading bytes before the first MPEG-TS sync byte are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use aes::Aes128;
use bytes::Bytes;
use cbc::{
    Decryptor,
    cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding},
};
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use url::Url;

use crate::cache::KeyCache;
use crate::downloader::SegmentFetcher;
use crate::error::{HlsError, HlsResult};
use crate::model::SegmentDescriptor;
use crate::settings::HlsSettings;
use crate::transport::header_map;

/// Callback type used to transform raw key bytes fetched from a key server
/// before they are used for decryption. This allows custom key wrapping/DRM flows.
pub type KeyProcessorCallback = dyn Fn(Bytes) -> Bytes + Send + Sync;

const AES_BLOCK: usize = 16;

/// MPEG-TS packet sync byte.
pub const TS_SYNC_BYTE: u8 = 0x47;

/// IV for segments without an explicit `IV=` attribute: the sequence number as a
/// big-endian 128-bit integer.
pub fn iv_from_sequence(sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}

/// Decrypts a block-aligned buffer with AES-128-CBC, leaving padding in place.
pub fn aes128_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> HlsResult<Vec<u8>> {
    if key.len() != 16 {
        return Err(HlsError::invalid_aes128_key_len(key.len()));
    }
    if iv.len() != 16 {
        return Err(HlsError::CryptoParam(format!(
            "IV must be 16 bytes, got {}",
            iv.len()
        )));
    }
    if ciphertext.len() % AES_BLOCK != 0 {
        return Err(HlsError::CryptoParam(format!(
            "ciphertext length {} is not a multiple of {AES_BLOCK}",
            ciphertext.len()
        )));
    }

    let decryptor = Decryptor::<Aes128>::new_from_slices(key, iv)
        .map_err(|e| HlsError::CryptoParam(e.to_string()))?;
    let mut buf = ciphertext.to_vec();
    let len = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| HlsError::CryptoParam(format!("AES-128-CBC decryption failed: {e}")))?
        .len();
    buf.truncate(len);
    Ok(buf)
}

/// Strips PKCS#7 padding. The pad byte must be in `1..=16` and not longer than the buffer.
pub fn pkcs7_unpad(data: &[u8]) -> HlsResult<&[u8]> {
    let Some(&pad) = data.last() else {
        return Err(HlsError::Padding { pad: 0, len: 0 });
    };
    let n = pad as usize;
    if n == 0 || n > AES_BLOCK || n > data.len() {
        return Err(HlsError::Padding {
            pad,
            len: data.len(),
        });
    }
    Ok(&data[..data.len() - n])
}

/// Offset of the first TS sync byte, or `0` when there is none.
pub fn sync_byte_offset(data: &[u8]) -> usize {
    data.iter().position(|&b| b == TS_SYNC_BYTE).unwrap_or(0)
}

/// Drops anything before the first TS sync byte. Buffers without one are returned unchanged.
pub fn align_to_sync_byte(data: &[u8]) -> &[u8] {
    &data[sync_byte_offset(data)..]
}

/// Decrypts fetched segments, resolving keys through a shared [`KeyCache`].
#[derive(Clone)]
pub struct SegmentDecryptor {
    keys: Arc<KeyCache>,
    fetcher: SegmentFetcher,
    key_headers: HeaderMap,
    key_query_params: Vec<(String, String)>,
    key_processor_cb: Option<Arc<Box<KeyProcessorCallback>>>,
}

impl SegmentDecryptor {
    pub fn new(keys: Arc<KeyCache>, fetcher: SegmentFetcher, key_headers: HeaderMap) -> Self {
        Self {
            keys,
            fetcher,
            key_headers,
            key_query_params: Vec::new(),
            key_processor_cb: None,
        }
    }

    /// Builds a decryptor from the key-related parts of `settings`.
    pub fn from_settings(
        keys: Arc<KeyCache>,
        fetcher: SegmentFetcher,
        settings: &HlsSettings,
    ) -> HlsResult<Self> {
        let headers = header_map(settings.effective_key_headers())?;
        Ok(Self::new(keys, fetcher, headers)
            .with_key_query_params(settings.key_query_params.as_ref())
            .with_key_processor(settings.key_processor_cb.clone()))
    }

    /// Query parameters appended to every key URL. Pairs are applied in sorted order so the
    /// resulting URL (and cache key) is stable.
    pub fn with_key_query_params(mut self, params: Option<&HashMap<String, String>>) -> Self {
        let mut pairs: Vec<(String, String)> = params
            .map(|p| p.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        pairs.sort();
        self.key_query_params = pairs;
        self
    }

    pub fn with_key_processor(mut self, cb: Option<Arc<Box<KeyProcessorCallback>>>) -> Self {
        self.key_processor_cb = cb;
        self
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Key URL as requested and cached.
    pub fn finalize_key_url(&self, key_url: &Url) -> Url {
        let mut url = key_url.clone();
        if !self.key_query_params.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in &self.key_query_params {
                qp.append_pair(k, v);
            }
        }
        url
    }

    /// Returns the 16-byte key behind `key_url`, fetching it on first use.
    pub async fn resolve_key(
        &self,
        key_url: &Url,
        cancel: &CancellationToken,
    ) -> HlsResult<[u8; 16]> {
        let final_url = self.finalize_key_url(key_url);
        self.keys
            .get(final_url.as_str(), || async {
                let mut kb = self
                    .fetcher
                    .fetch(&final_url, &self.key_headers, cancel)
                    .await?;
                if let Some(cb) = &self.key_processor_cb {
                    kb = (cb)(kb);
                }
                <[u8; 16]>::try_from(kb.as_ref())
                    .map_err(|_| HlsError::invalid_aes128_key_len(kb.len()))
            })
            .await
    }

    /// Turns a fetched segment body into plaintext.
    pub async fn decrypt(
        &self,
        segment: &SegmentDescriptor,
        ciphertext: Bytes,
        cancel: &CancellationToken,
    ) -> HlsResult<Bytes> {
        let Some(enc) = segment.encryption() else {
            return Ok(ciphertext);
        };

        let key = self.resolve_key(&enc.key_url, cancel).await?;
        let iv = enc.iv_for(segment.sequence);

        let plain = aes128_cbc_decrypt(&key, &iv, &ciphertext)?;
        let end = pkcs7_unpad(&plain)?.len();
        let start = sync_byte_offset(&plain[..end]);
        if start > 0 {
            trace!(
                sequence = segment.sequence,
                skipped = start,
                "dropping bytes before TS sync byte"
            );
        }
        Ok(Bytes::from(plain).slice(start..end))
    }
}
