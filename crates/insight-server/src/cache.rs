use std::collections::HashMap;
use std::time::{Duration, Instant};

use insight_contracts::DigestResult;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: DigestResult,
    pub expires_at: Instant,
    pub payload_hash: String,
}

/// Process-lifetime digest cache. Built once at startup and handed to the
/// gateway; expired entries are dropped when their key is next looked up.
#[derive(Debug, Default)]
pub struct InsightCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InsightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<DigestResult> {
        self.get_at(key, Instant::now()).await
    }

    pub async fn get_at(&self, key: &str, now: Instant) -> Option<DigestResult> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn put(
        &self,
        key: String,
        payload_hash: String,
        response: DigestResult,
        ttl: Duration,
    ) {
        self.put_at(key, payload_hash, response, ttl, Instant::now())
            .await
    }

    pub async fn put_at(
        &self,
        key: String,
        payload_hash: String,
        response: DigestResult,
        ttl: Duration,
        now: Instant,
    ) {
        let mut entries = self.entries.lock().await;
        entries.remove(&key);
        entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: now + ttl,
                payload_hash,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
