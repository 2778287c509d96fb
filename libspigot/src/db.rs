//! Item store for Spigot
//!
//! Every entry ever ingested is kept in a single append-and-mark-only `items`
//! table. Rows are created once at ingestion and updated once when posted.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use tracing::debug;

use crate::error::{DbError, Result};
use crate::types::{Item, NewItem};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the item store at `db_path`
    ///
    /// Runs the embedded migrations and refuses databases written by spigot
    /// releases older than 2.2, whose rows carry no rendered message.
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes keep the URL valid on Windows; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        Self::init(pool, &expanded_path).await
    }

    /// Open a private in-memory store
    pub async fn in_memory() -> Result<Self> {
        // A single connection, otherwise every pooled connection gets its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        Self::init(pool, ":memory:").await
    }

    async fn init(pool: SqlitePool, label: &str) -> Result<Self> {
        // Rejected databases are left exactly as they were found
        if is_legacy_schema(&pool).await? {
            pool.close().await;
            return Err(DbError::LegacySchema(label.to_string()).into());
        }

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        debug!(path = %label, "Opened item store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check whether an item with this link has been stored
    pub async fn has_link(&self, link: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM items WHERE link = ? LIMIT 1")
            .bind(link)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(row.is_some())
    }

    /// Store a new, unposted item
    ///
    /// Fails with [`DbError::DuplicateLink`] if the link is already present.
    /// Callers check [`Database::has_link`] first; the single-process relay
    /// does not need this to be race-free.
    pub async fn insert(&self, item: NewItem) -> Result<Item> {
        if self.has_link(&item.link).await? {
            return Err(DbError::DuplicateLink(item.link).into());
        }

        sqlx::query(
            r#"
            INSERT INTO items (feed, link, message, title, date, posted)
            VALUES (?, ?, ?, ?, ?, NULL)
            "#,
        )
        .bind(&item.feed_id)
        .bind(&item.link)
        .bind(&item.message)
        .bind(&item.title)
        .bind(item.published_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        debug!(feed = %item.feed_id, link = %item.link, "Stored item");
        Ok(item.into())
    }

    /// Fetch a single item by link
    pub async fn get(&self, link: &str) -> Result<Option<Item>> {
        let row = sqlx::query(
            r#"
            SELECT feed, link, message, title, date, posted
            FROM items WHERE link = ?
            "#,
        )
        .bind(link)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(item_from_row).transpose()
    }

    /// All unposted items of a feed, oldest publication first
    pub async fn unposted(&self, feed_id: &str) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT feed, link, message, title, date, posted
            FROM items
            WHERE feed = ? AND posted IS NULL
            ORDER BY date ASC, rowid ASC
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(item_from_row).collect()
    }

    /// Record delivery of an item
    ///
    /// `at` defaults to the current time. An explicit time is used when a
    /// post is found to exist remotely already. Returns `false` when the item
    /// was already marked, in which case the stored time is left untouched.
    pub async fn mark_posted(&self, link: &str, at: Option<i64>) -> Result<bool> {
        let posted_at = at.unwrap_or_else(|| chrono::Utc::now().timestamp());

        let result = sqlx::query(
            r#"
            UPDATE items SET posted = ? WHERE link = ? AND posted IS NULL
            "#,
        )
        .bind(posted_at)
        .bind(link)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() > 0 {
            debug!(link = %link, posted_at, "Marked item posted");
            return Ok(true);
        }

        if !self.has_link(link).await? {
            return Err(DbError::UnknownLink(link.to_string()).into());
        }

        debug!(link = %link, "Item was already marked posted");
        Ok(false)
    }

    /// Most recent delivery time for a feed, `None` if nothing was posted yet
    pub async fn latest_posted(&self, feed_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query_as::<_, (Option<i64>,)>(
            r#"
            SELECT MAX(posted) FROM items WHERE feed = ?
            "#,
        )
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.0)
    }

    /// Number of stored items, optionally restricted to one feed
    pub async fn count(&self, feed_id: Option<&str>) -> Result<i64> {
        let row = match feed_id {
            Some(feed) => sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM items WHERE feed = ?")
                .bind(feed)
                .fetch_one(&self.pool)
                .await,
            None => sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM items")
                .fetch_one(&self.pool)
                .await,
        }
        .map_err(DbError::SqlxError)?;

        Ok(row.0)
    }
}

/// True if an existing `items` table predates the rendered `message` column
async fn is_legacy_schema(pool: &SqlitePool) -> Result<bool> {
    let columns = sqlx::query("PRAGMA table_info(items)")
        .fetch_all(pool)
        .await
        .map_err(DbError::SqlxError)?;

    if columns.is_empty() {
        return Ok(false);
    }

    let mut has_message = false;
    for column in &columns {
        let name: String = column.try_get("name").map_err(DbError::SqlxError)?;
        has_message |= name == "message";
    }
    Ok(!has_message)
}

/// Decode a row, failing on columns written with another type (e.g. text dates)
fn item_from_row(r: &SqliteRow) -> Result<Item> {
    Ok(Item {
        feed_id: r.try_get("feed").map_err(DbError::SqlxError)?,
        link: r.try_get("link").map_err(DbError::SqlxError)?,
        message: r.try_get("message").map_err(DbError::SqlxError)?,
        title: r.try_get("title").map_err(DbError::SqlxError)?,
        published_at: r.try_get("date").map_err(DbError::SqlxError)?,
        posted_at: r.try_get("posted").map_err(DbError::SqlxError)?,
    })
}
