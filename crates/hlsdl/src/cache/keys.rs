//! AES key cache.
//!
//! Maps a final key URL (after query parameters are appended) to the 16 raw key bytes.
//!
//! Single flight
//! -------------
//! Every URL owns an `OnceCell`. Concurrent callers for the same URL share that cell, so the
//! first caller performs the fetch and the others await its result. A failed fetch leaves the
//! cell empty, and the next caller retries.
//!
//! The map lock is only held to look up or insert a cell, never across an `.await`.
//!
//! Logging
//! -------
//! `trace` on hits, `debug` when a fetch is performed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::error::HlsResult;

type KeySlot = Arc<OnceCell<[u8; 16]>>;

/// Thread-safe cache from key URL to AES-128 key bytes.
#[derive(Debug, Default)]
pub struct KeyCache {
    slots: Mutex<HashMap<String, KeySlot>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the key for `url`, running `fetch` at most once per URL among concurrent callers.
    pub async fn get<F, Fut>(&self, url: &str, fetch: F) -> HlsResult<[u8; 16]>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = HlsResult<[u8; 16]>>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(url.to_string()).or_default().clone()
        };

        if let Some(key) = slot.get() {
            trace!(url = url, "key cache hit");
            return Ok(*key);
        }

        let key = slot
            .get_or_try_init(|| async {
                debug!(url = url, "key cache miss, fetching");
                fetch().await
            })
            .await?;
        Ok(*key)
    }

    /// Whether a resolved key is stored for `url`.
    pub fn contains(&self, url: &str) -> bool {
        self.slots
            .lock()
            .get(url)
            .is_some_and(|slot| slot.initialized())
    }

    /// Number of resolved keys.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached key. Must not race with a running pipeline.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}
