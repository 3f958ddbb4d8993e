//! SQLite feed registry.

use async_trait::async_trait;
use chrono::Utc;

use super::{FeedRegistry, StatsMutator};
use crate::db::{parse_datetime, DbPool};
use crate::feed::{Feed, FeedDefinition, FeedStats, Item};
use crate::{FeedhookError, Result};

/// Row type for a feed from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: String,
    url: String,
    refresh_interval_secs: i64,
    webhook_url: String,
    time_first_fetch: Option<String>,
    time_last_fetch: Option<String>,
    items_fetched_total: i64,
    items_cached: i64,
    notifications_sent: i64,
}

impl FeedRow {
    fn definition(&self) -> FeedDefinition {
        FeedDefinition {
            id: self.id.clone(),
            url: self.url.clone(),
            refresh_interval_secs: self.refresh_interval_secs.max(1) as u64,
            webhook_url: self.webhook_url.clone(),
        }
    }

    fn stats(&self) -> FeedStats {
        FeedStats {
            time_first_fetch: self.time_first_fetch.as_deref().and_then(parse_datetime),
            time_last_fetch: self.time_last_fetch.as_deref().and_then(parse_datetime),
            items_fetched_total: self.items_fetched_total.max(0) as u64,
            items_cached: self.items_cached.max(0) as u64,
            notifications_sent: self.notifications_sent.max(0) as u64,
        }
    }
}

/// Row type for a snapshot item from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ItemRow {
    title: String,
    link: String,
    published: String,
    summary: String,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            title: row.title,
            link: row.link,
            published: parse_datetime(&row.published).unwrap_or_else(Utc::now),
            summary: row.summary,
        }
    }
}

const FEED_COLUMNS: &str = "id, url, refresh_interval_secs, webhook_url, time_first_fetch, \
     time_last_fetch, items_fetched_total, items_cached, notifications_sent";

/// Feed registry backed by SQLite.
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    pool: DbPool,
}

impl SqliteRegistry {
    /// Create a registry on top of an opened database pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, id: &str) -> Result<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT title, link, published, summary
            FROM feed_items
            WHERE feed_id = $1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Item::from).collect())
    }
}

#[async_trait]
impl FeedRegistry for SqliteRegistry {
    async fn register(&self, definition: FeedDefinition) -> Result<Feed> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO feeds (id, url, refresh_interval_secs, webhook_url)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.url)
        .bind(definition.refresh_interval_secs as i64)
        .bind(&definition.webhook_url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FeedhookError::Conflict(format!(
                "feed {} already registered",
                definition.id
            )));
        }
        Ok(Feed::new(definition))
    }

    async fn get(&self, id: &str) -> Result<Feed> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = $1");
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FeedhookError::NotFound(format!("feed {id}")))?;

        let items = self.load_items(id).await?;
        Ok(Feed {
            definition: row.definition(),
            stats: row.stats(),
            items,
        })
    }

    async fn list(&self) -> Result<Vec<FeedDefinition>> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY created_at, id");
        let rows = sqlx::query_as::<_, FeedRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(FeedRow::definition).collect())
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY created_at, id");
        let rows = sqlx::query_as::<_, FeedRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        let mut feeds = Vec::with_capacity(rows.len());
        for row in rows {
            let items = self.load_items(&row.id).await?;
            feeds.push(Feed {
                definition: row.definition(),
                stats: row.stats(),
                items,
            });
        }
        Ok(feeds)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // feed_items rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM feeds WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(FeedhookError::NotFound(format!("feed {id}")));
        }

        // Seen records are keyed by feed id without a foreign key, since the
        // stores may also be used on their own.
        sqlx::query("DELETE FROM seen_items WHERE feed_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM seen_filters WHERE feed_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_stats(&self, id: &str, mutator: StatsMutator) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Take the write lock before reading so the read-modify-write cannot
        // interleave with another writer.
        let locked = sqlx::query("UPDATE feeds SET id = id WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            return Ok(false);
        }

        let query = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = $1");
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        let mut stats = row.stats();
        mutator(&mut stats);

        sqlx::query(
            r#"
            UPDATE feeds
            SET time_first_fetch = $1,
                time_last_fetch = $2,
                items_fetched_total = $3,
                items_cached = $4,
                notifications_sent = $5
            WHERE id = $6
            "#,
        )
        .bind(stats.time_first_fetch.map(|dt| dt.to_rfc3339()))
        .bind(stats.time_last_fetch.map(|dt| dt.to_rfc3339()))
        .bind(stats.items_fetched_total as i64)
        .bind(stats.items_cached as i64)
        .bind(stats.notifications_sent as i64)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn replace_snapshot(&self, id: &str, items: Vec<Item>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query("UPDATE feeds SET id = id WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM feed_items WHERE feed_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO feed_items (feed_id, position, title, link, published, summary)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(id)
            .bind(position as i64)
            .bind(&item.title)
            .bind(&item.link)
            .bind(item.published.to_rfc3339())
            .bind(&item.summary)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
