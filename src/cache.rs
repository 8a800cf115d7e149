//! Content-addressed response cache.
//!
//! Answers are memoized per scope under `sha256(normalize(prompt))`, so
//! prompts that differ only in whitespace runs or letter case share one
//! entry within a scope. The pipeline scopes by routed profile. The cache
//! store is best-effort: any store failure degrades to a miss and never fails
//! the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::error::StoreError;

/// Key-value store with per-key TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live (non-expired) value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Collapse whitespace runs to one space, trim, and lowercase.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Hex SHA-256 of the normalized prompt.
pub fn digest(prompt: &str) -> String {
    hex::encode(Sha256::digest(normalize_prompt(prompt).as_bytes()))
}

/// Memoizes expensive answer generation.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    name: String,
    ttl: Duration,
    store_timeout: Duration,
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        name: impl Into<String>,
        ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            name: name.into(),
            ttl,
            store_timeout,
        }
    }

    fn key_for(&self, scope: &str, digest: &str) -> String {
        format!("cache:{}:{}:{}", self.name, scope, digest)
    }

    /// Return the cached value for `prompt` within `scope`, or run `compute`
    /// once and cache it.
    ///
    /// Returns `(value, was_cached)`. `compute` errors are passed through
    /// untouched and nothing is stored for them.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        scope: &str,
        prompt: &str,
        compute: F,
    ) -> Result<(T, bool), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let digest = digest(prompt);
        let key = self.key_for(scope, &digest);
        let short = &digest[..12];

        match tokio::time::timeout(self.store_timeout, self.store.get(&key)).await {
            Ok(Ok(Some(raw))) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    debug!(cache_name = %self.name, key = short, "Cache hit");
                    return Ok((value, true));
                }
                Err(e) => {
                    warn!(cache_name = %self.name, key = short, error = %e, "Discarding undecodable cache entry");
                }
            },
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                warn!(cache_name = %self.name, key = short, error = %e, "Cache lookup failed, treating as miss");
            }
            Err(_) => {
                warn!(cache_name = %self.name, key = short, "Cache lookup timed out, treating as miss");
            }
        }

        debug!(cache_name = %self.name, key = short, "Cache miss");
        let value = compute(prompt.to_string()).await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                match tokio::time::timeout(self.store_timeout, self.store.set(&key, &raw, self.ttl))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(cache_name = %self.name, key = short, error = %e, "Failed to store in cache");
                    }
                    Err(_) => {
                        error!(cache_name = %self.name, key = short, "Timed out storing in cache");
                    }
                }
            }
            Err(e) => {
                error!(cache_name = %self.name, key = short, error = %e, "Failed to serialize cache value");
            }
        }

        Ok((value, false))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::MemoryStore;

    fn cache(store: Arc<dyn CacheStore>) -> ResponseCache {
        ResponseCache::new(store, "test", Duration::from_secs(60), Duration::from_secs(1))
    }

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        assert_eq!(normalize_prompt("  Hello\t\n  WORLD  "), "hello world");
        assert_eq!(normalize_prompt(""), "");
    }

    #[test]
    fn cosmetic_differences_share_a_digest() {
        let variants = [
            "What is AWS Lambda?",
            "what is aws lambda?",
            "  What   is\nAWS\tLambda?  ",
            "WHAT IS AWS LAMBDA?",
        ];
        let first = digest(variants[0]);
        for v in &variants[1..] {
            assert_eq!(digest(v), first, "digest differs for {v:?}");
        }
        assert_ne!(digest("What is AWS Lambda"), first);
        assert_eq!(first.len(), 64);
    }

    #[tokio::test]
    async fn computes_once_per_normalized_prompt() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let calls = AtomicUsize::new(0);

        for prompt in ["Tell me about Rust", "tell me   about rust", "TELL ME ABOUT RUST"] {
            let (value, _) = cache
                .get_or_compute("Titan", prompt, |p| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, std::convert::Infallible>(format!("answer to {p}")) }
                })
                .await
                .unwrap();
            assert_eq!(value, "answer to Tell me about Rust");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reports_whether_value_was_cached() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let (_, cached) = cache
            .get_or_compute("Titan", "q", |_| async { Ok::<_, String>("a".to_string()) })
            .await
            .unwrap();
        assert!(!cached);
        let (value, cached) = cache
            .get_or_compute("Titan", "q", |_| async { Ok::<_, String>("b".to_string()) })
            .await
            .unwrap();
        assert!(cached);
        assert_eq!(value, "a");
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let err = cache
            .get_or_compute("Titan", "q", |_| async { Err::<String, _>("provider down") })
            .await
            .unwrap_err();
        assert_eq!(err, "provider down");

        let (value, cached) = cache
            .get_or_compute("Titan", "q", |_| async { Ok::<_, &str>("recovered".to_string()) })
            .await
            .unwrap();
        assert!(!cached);
        assert_eq!(value, "recovered");
    }

    #[tokio::test]
    async fn scopes_do_not_share_entries() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let (first, _) = cache
            .get_or_compute("Titan", "q", |_| async { Ok::<_, String>("titan".to_string()) })
            .await
            .unwrap();
        let (second, cached) = cache
            .get_or_compute("Gemini", "q", |_| async { Ok::<_, String>("gemini".to_string()) })
            .await
            .unwrap();
        assert_eq!(first, "titan");
        assert_eq!(second, "gemini");
        assert!(!cached);

        let (again, cached) = cache
            .get_or_compute("Titan", "Q", |_| async { Ok::<_, String>("unused".to_string()) })
            .await
            .unwrap();
        assert!(cached);
        assert_eq!(again, "titan");
    }

    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Connection("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Connection("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn store_outage_degrades_to_always_miss() {
        let cache = cache(Arc::new(DownStore));
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let (value, cached) = cache
                .get_or_compute("Titan", "q", |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>("fresh".to_string()) }
                })
                .await
                .unwrap();
            assert_eq!(value, "fresh");
            assert!(!cached);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn undecodable_entry_is_recomputed() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());
        store
            .set(&cache.key_for("Titan", &digest("q")), "not json", Duration::from_secs(60))
            .await
            .unwrap();

        let (value, cached) = cache
            .get_or_compute("Titan", "q", |_| async { Ok::<_, String>("fresh".to_string()) })
            .await
            .unwrap();
        assert!(!cached);
        assert_eq!(value, "fresh");
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::new(store, "test", Duration::from_millis(20), Duration::from_secs(1));
        cache
            .get_or_compute("Titan", "q", |_| async { Ok::<_, String>("first".to_string()) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let (value, cached) = cache
            .get_or_compute("Titan", "q", |_| async { Ok::<_, String>("second".to_string()) })
            .await
            .unwrap();
        assert!(!cached);
        assert_eq!(value, "second");
    }
}
