//! libSQL backend for the shared quota, cache and dead-letter state.
//!
//! Supports a local file, an in-memory database, or a remote libSQL server
//! shared by several stateless workers. A single connection is reused for
//! all operations; `libsql::Connection` is `Send + Sync`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::CacheStore;
use crate::delivery::{DeadLetterRecord, DeadLetterSink};
use crate::error::StoreError;
use crate::quota::{QuotaKey, QuotaStore};
use crate::store::migrations;

/// libSQL-backed store.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Connect to a remote libSQL server.
    pub async fn new_remote(url: &str, auth_token: &str) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to {url}: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(url, "Remote database connected");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Delete expired cache rows. Returns the number removed.
    pub async fn purge_expired_cache(&self) -> Result<u64, StoreError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM cache_entries WHERE expires_at_ms <= ?1",
                params![Utc::now().timestamp_millis()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("purge_expired_cache: {e}")))?;
        if count > 0 {
            info!(count, "Purged expired cache entries");
        }
        Ok(count)
    }

    /// Number of dead-letter records stored.
    pub async fn dead_letter_count(&self) -> Result<u64, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM dead_letters", ())
            .await
            .map_err(|e| StoreError::Query(format!("dead_letter_count: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(StoreError::Query(format!("dead_letter_count: {e}"))),
        }
    }
}

#[async_trait]
impl QuotaStore for LibSqlBackend {
    async fn try_consume(
        &self,
        key: &QuotaKey,
        now_ms: i64,
        cutoff_ms: i64,
        limit: u32,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM quota_events WHERE plan = ?1 AND sender = ?2 AND ts_ms < ?3",
            params![key.plan.as_str(), key.sender.as_str(), cutoff_ms],
        )
        .await
        .map_err(|e| StoreError::Query(format!("quota prune: {e}")))?;

        // Count and record in one statement: SQLite serializes writers, so the
        // count cannot change between the check and the insert.
        let inserted = conn
            .execute(
                "INSERT INTO quota_events (id, plan, sender, ts_ms)
                 SELECT ?1, ?2, ?3, ?4
                 WHERE (SELECT COUNT(*) FROM quota_events
                        WHERE plan = ?2 AND sender = ?3 AND ts_ms >= ?5) < ?6",
                params![
                    Uuid::new_v4().to_string(),
                    key.plan.as_str(),
                    key.sender.as_str(),
                    now_ms,
                    cutoff_ms,
                    i64::from(limit),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("quota consume: {e}")))?;

        debug!(key = %key, admitted = inserted == 1, "Quota consume evaluated");
        Ok(inserted == 1)
    }

    async fn usage(&self, key: &QuotaKey, cutoff_ms: i64) -> Result<u32, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM quota_events WHERE plan = ?1 AND sender = ?2 AND ts_ms >= ?3",
                params![key.plan.as_str(), key.sender.as_str(), cutoff_ms],
            )
            .await
            .map_err(|e| StoreError::Query(format!("quota usage: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u32),
            Ok(None) => Ok(0),
            Err(e) => Err(StoreError::Query(format!("quota usage: {e}"))),
        }
    }
}

#[async_trait]
impl CacheStore for LibSqlBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, Utc::now().timestamp_millis()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("cache get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<String>(0)
                .map(Some)
                .map_err(|e| StoreError::Query(format!("cache get row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("cache get: {e}"))),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at_ms = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        self.conn()
            .execute(
                "INSERT INTO cache_entries (key, value, expires_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at_ms = excluded.expires_at_ms",
                params![key, value, expires_at_ms],
            )
            .await
            .map_err(|e| StoreError::Query(format!("cache set: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for LibSqlBackend {
    async fn append(&self, record: &DeadLetterRecord) -> Result<(), StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn()
            .execute(
                "INSERT INTO dead_letters (id, recipient, subject, html, text, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.clone(),
                    record.to.as_str(),
                    record.subject.as_str(),
                    record.html.as_str(),
                    record.text.as_str(),
                    record.error.as_str(),
                    record.timestamp.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("dead letter append: {e}")))?;

        info!(id = %id, to = %record.to, "Dead-letter record written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn consume_admits_until_limit() {
        let db = test_db().await;
        let key = QuotaKey::new("free", "a@x.com");
        assert!(db.try_consume(&key, 1_000, 0, 2).await.unwrap());
        assert!(db.try_consume(&key, 2_000, 0, 2).await.unwrap());
        assert!(!db.try_consume(&key, 3_000, 0, 2).await.unwrap());
        assert_eq!(db.usage(&key, 0).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn consume_prunes_expired_entries() {
        let db = test_db().await;
        let key = QuotaKey::new("free", "a@x.com");
        assert!(db.try_consume(&key, 1_000, 0, 1).await.unwrap());
        assert!(!db.try_consume(&key, 1_500, 500, 1).await.unwrap());
        assert!(db.try_consume(&key, 2_001, 1_001, 1).await.unwrap());
        assert_eq!(db.usage(&key, 1_001).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn entry_at_cutoff_still_counts() {
        let db = test_db().await;
        let key = QuotaKey::new("free", "a@x.com");
        assert!(db.try_consume(&key, 1_000, 0, 1).await.unwrap());
        assert!(!db.try_consume(&key, 2_000, 1_000, 1).await.unwrap());
        assert_eq!(db.usage(&key, 1_000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let db = test_db().await;
        let a = QuotaKey::new("free", "a@x.com");
        let b = QuotaKey::new("free", "b@x.com");
        let pro = QuotaKey::new("pro", "a@x.com");
        assert!(db.try_consume(&a, 1_000, 0, 1).await.unwrap());
        assert!(db.try_consume(&b, 1_000, 0, 1).await.unwrap());
        assert!(db.try_consume(&pro, 1_000, 0, 1).await.unwrap());
        assert!(!db.try_consume(&a, 1_001, 0, 1).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_consumes_on_shared_file_admit_one() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(
            LibSqlBackend::new_local(&dir.path().join("quota.db"))
                .await
                .unwrap(),
        );
        let key = QuotaKey::new("free", "race@x.com");

        let results = futures_util::future::join_all((0..8).map(|i| {
            let db = Arc::clone(&db);
            let key = key.clone();
            async move { db.try_consume(&key, 10_000 + i, 0, 1).await }
        }))
        .await;

        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(admitted, 1);
        assert_eq!(db.usage(&key, 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cache_roundtrip_and_overwrite() {
        let db = test_db().await;
        assert_eq!(db.get("k").await.unwrap(), None);
        db.set("k", "\"v1\"", Duration::from_secs(60)).await.unwrap();
        assert_eq!(db.get("k").await.unwrap().as_deref(), Some("\"v1\""));
        db.set("k", "\"v2\"", Duration::from_secs(60)).await.unwrap();
        assert_eq!(db.get("k").await.unwrap().as_deref(), Some("\"v2\""));
    }

    #[tokio::test]
    async fn expired_cache_entries_are_invisible_and_purged() {
        let db = test_db().await;
        db.set("old", "\"x\"", Duration::ZERO).await.unwrap();
        assert_eq!(db.get("old").await.unwrap(), None);
        assert_eq!(db.purge_expired_cache().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dead_letters_are_appended() {
        let db = test_db().await;
        let record = DeadLetterRecord {
            to: "a@x.com".into(),
            subject: "Re: hi".into(),
            html: "<p>x</p>".into(),
            text: "x".into(),
            error: "SendGrid 500".into(),
            timestamp: Utc::now(),
        };
        db.append(&record).await.unwrap();
        db.append(&record).await.unwrap();
        assert_eq!(db.dead_letter_count().await.unwrap(), 2);
    }
}
