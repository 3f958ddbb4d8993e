//! SQLite persistence for the seen-item stores.

use async_trait::async_trait;

use super::approximate::FilterBlobStore;
use super::bloom::FORMAT_VERSION;
use super::SeenItemStore;
use crate::db::DbPool;
use crate::Result;

/// Exact seen-item store on the `seen_items` table.
///
/// Same expiry rules as [`MemoryTtlStore`](super::MemoryTtlStore).
#[derive(Debug, Clone)]
pub struct SqliteTtlStore {
    pool: DbPool,
    ttl_cycles: u32,
}

impl SqliteTtlStore {
    pub fn new(pool: DbPool, ttl_cycles: u32) -> Self {
        Self { pool, ttl_cycles }
    }
}

#[async_trait]
impl SeenItemStore for SqliteTtlStore {
    async fn contains(&self, feed_id: &str, identity: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM seen_items WHERE feed_id = $1 AND identity = $2")
                .bind(feed_id)
                .bind(identity)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn mark(&self, feed_id: &str, identity: &str) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO seen_items (feed_id, identity, age) VALUES ($1, $2, 0)",
        )
        .bind(feed_id)
        .bind(identity)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() > 0 {
            return Ok(true);
        }

        sqlx::query("UPDATE seen_items SET age = 0 WHERE feed_id = $1 AND identity = $2")
            .bind(feed_id)
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(false)
    }

    async fn unmark(&self, feed_id: &str, identity: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM seen_items WHERE feed_id = $1 AND identity = $2")
            .bind(feed_id)
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn evict_stale(&self, feed_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE seen_items SET age = age + 1 WHERE feed_id = $1")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        let evicted = sqlx::query("DELETE FROM seen_items WHERE feed_id = $1 AND age > $2")
            .bind(feed_id)
            .bind(self.ttl_cycles as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(evicted.rows_affected())
    }

    async fn size(&self, feed_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_items WHERE feed_id = $1")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn purge(&self, feed_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM seen_items WHERE feed_id = $1")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn supports_rollback(&self) -> bool {
        true
    }
}

/// Filter blobs on the `seen_filters` table.
#[derive(Debug, Clone)]
pub struct SqliteBlobStore {
    pool: DbPool,
}

impl SqliteBlobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FilterBlobStore for SqliteBlobStore {
    async fn load(&self, feed_id: &str) -> Result<Option<Vec<u8>>> {
        let data: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT data FROM seen_filters WHERE feed_id = $1")
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(data)
    }

    async fn save(&self, feed_id: &str, data: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO seen_filters (feed_id, format_version, data, updated_at)
            VALUES ($1, $2, $3, datetime('now'))
            ON CONFLICT(feed_id) DO UPDATE SET
                format_version = excluded.format_version,
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(feed_id)
        .bind(FORMAT_VERSION as i64)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, feed_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM seen_filters WHERE feed_id = $1")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::seen::ApproximateStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ttl_store_mark_and_evict() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SqliteTtlStore::new(db.pool().clone(), 2);

        assert!(store.mark("feed", "http://x/1").await.unwrap());
        assert!(!store.mark("feed", "http://x/1").await.unwrap());
        assert!(store.mark("feed", "http://x/2").await.unwrap());
        assert_eq!(store.size("feed").await.unwrap(), 2);

        assert_eq!(store.evict_stale("feed").await.unwrap(), 0);
        store.mark("feed", "http://x/1").await.unwrap();
        assert_eq!(store.evict_stale("feed").await.unwrap(), 0);
        assert_eq!(store.evict_stale("feed").await.unwrap(), 1);

        assert!(store.contains("feed", "http://x/1").await.unwrap());
        assert!(!store.contains("feed", "http://x/2").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_store_unmark_and_purge() {
        let db = Database::open_in_memory().await.unwrap();
        let store = SqliteTtlStore::new(db.pool().clone(), 3);
        store.mark("a", "http://x/1").await.unwrap();
        store.mark("b", "http://x/1").await.unwrap();

        assert!(store.unmark("a", "http://x/1").await.unwrap());
        assert!(!store.unmark("a", "http://x/1").await.unwrap());

        store.purge("b").await.unwrap();
        assert_eq!(store.size("b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blob_store_upsert() {
        let db = Database::open_in_memory().await.unwrap();
        let blobs = SqliteBlobStore::new(db.pool().clone());

        assert!(blobs.load("feed").await.unwrap().is_none());
        blobs.save("feed", b"one").await.unwrap();
        blobs.save("feed", b"two").await.unwrap();
        assert_eq!(blobs.load("feed").await.unwrap(), Some(b"two".to_vec()));

        blobs.delete("feed").await.unwrap();
        assert!(blobs.load("feed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_approximate_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.db");

        let db = Database::open(&path).await.unwrap();
        let store = ApproximateStore::new(
            Arc::new(SqliteBlobStore::new(db.pool().clone())),
            100,
            0.001,
        );
        store.mark("feed", "http://x/1").await.unwrap();
        store.flush("feed").await.unwrap();
        db.close().await;

        let db = Database::open(&path).await.unwrap();
        let store = ApproximateStore::new(
            Arc::new(SqliteBlobStore::new(db.pool().clone())),
            100,
            0.001,
        );
        assert!(store.contains("feed", "http://x/1").await.unwrap());
    }
}
