//! In-process store for tests and single-node development.
//!
//! Implements the quota, cache and dead-letter collaborators on top of
//! `tokio::sync::Mutex`-guarded maps. Nothing is shared across processes.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache::CacheStore;
use crate::delivery::{DeadLetterRecord, DeadLetterSink};
use crate::error::StoreError;
use crate::quota::{QuotaKey, QuotaStore};

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    /// Per-key event timestamps (ms), oldest first.
    windows: Mutex<HashMap<QuotaKey, VecDeque<i64>>>,
    cache: Mutex<HashMap<String, (String, Instant)>>,
    dead_letters: Mutex<Vec<DeadLetterRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all dead-letter records written so far.
    pub async fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.dead_letters.lock().await.clone()
    }
}

fn prune(events: &mut VecDeque<i64>, cutoff_ms: i64) {
    while events.front().is_some_and(|&ts| ts < cutoff_ms) {
        events.pop_front();
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn try_consume(
        &self,
        key: &QuotaKey,
        now_ms: i64,
        cutoff_ms: i64,
        limit: u32,
    ) -> Result<bool, StoreError> {
        let mut windows = self.windows.lock().await;
        let events = windows.entry(key.clone()).or_default();
        prune(events, cutoff_ms);
        if events.len() >= limit as usize {
            return Ok(false);
        }
        // Keep the deque ordered even if callers' clocks disagree slightly.
        let pos = events.partition_point(|&ts| ts <= now_ms);
        events.insert(pos, now_ms);
        Ok(true)
    }

    async fn usage(&self, key: &QuotaKey, cutoff_ms: i64) -> Result<u32, StoreError> {
        let windows = self.windows.lock().await;
        Ok(windows
            .get(key)
            .map(|events| events.iter().filter(|&&ts| ts >= cutoff_ms).count() as u32)
            .unwrap_or(0))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                cache.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.cache
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for MemoryStore {
    async fn append(&self, record: &DeadLetterRecord) -> Result<(), StoreError> {
        self.dead_letters.lock().await.push(record.clone());
        Ok(())
    }
}
