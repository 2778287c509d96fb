//! Ingestion of feed entries into the item store
//!
//! Entries are identified by their link. An entry whose link is already
//! stored is skipped, so ingesting the same feed twice adds nothing the
//! second time. Entries that cannot be dated or have no link are skipped
//! individually; a feed that cannot be fetched is skipped as a whole.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::db::Database;
use crate::error::{DbError, Result, SpigotError};
use crate::feeds::FeedFetcher;
use crate::template;
use crate::types::{NewItem, RawEntry};

/// Outcome of ingesting one feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub feed_id: String,
    /// Entries returned by the fetcher
    pub seen: usize,
    /// Entries stored as new items
    pub added: usize,
    /// Entries dropped for missing link or timestamp
    pub skipped: usize,
    /// Set when the feed could not be fetched or parsed
    pub fetch_error: Option<String>,
}

impl IngestReport {
    pub fn fetch_failed(&self) -> bool {
        self.fetch_error.is_some()
    }
}

pub struct Ingester<'a> {
    db: &'a Database,
    fetcher: &'a dyn FeedFetcher,
}

impl<'a> Ingester<'a> {
    pub fn new(db: &'a Database, fetcher: &'a dyn FeedFetcher) -> Self {
        Self { db, fetcher }
    }

    /// Fetch a feed and store its new entries
    ///
    /// # Errors
    ///
    /// Only store failures are returned; fetch failures are logged and
    /// reported through [`IngestReport::fetch_error`].
    pub async fn ingest(&self, feed: &FeedConfig) -> Result<IngestReport> {
        let mut report = IngestReport {
            feed_id: feed.feed_id.clone(),
            ..Default::default()
        };

        debug!(feed = %feed.feed_id, "Polling feed for new items");
        let entries = match self.fetcher.fetch(&feed.feed_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(feed = %feed.feed_id, "Unable to read feed: {}", e);
                report.fetch_error = Some(e.to_string());
                return Ok(report);
            }
        };

        report.seen = entries.len();
        debug!(feed = %feed.feed_id, "Found {} items in feed", entries.len());

        for entry in &entries {
            match self.ingest_entry(feed, entry).await? {
                EntryOutcome::Added => report.added += 1,
                EntryOutcome::Known => {}
                EntryOutcome::Skipped => report.skipped += 1,
            }
        }

        info!(feed = %feed.feed_id, "Found {} new items in feed", report.added);
        Ok(report)
    }

    /// Store several feeds one after another
    pub async fn ingest_all(&self, feeds: &[FeedConfig]) -> Result<Vec<IngestReport>> {
        let mut reports = Vec::with_capacity(feeds.len());
        for feed in feeds {
            reports.push(self.ingest(feed).await?);
        }
        Ok(reports)
    }

    async fn ingest_entry(&self, feed: &FeedConfig, entry: &RawEntry) -> Result<EntryOutcome> {
        let Some(link) = entry.link.as_deref() else {
            warn!(feed = %feed.feed_id, "Skipping entry without a link");
            return Ok(EntryOutcome::Skipped);
        };

        if self.db.has_link(link).await? {
            debug!(link = %link, "Already in database");
            return Ok(EntryOutcome::Known);
        }

        let Some(published_at) = entry.timestamp() else {
            warn!(feed = %feed.feed_id, link = %link, "Skipping entry without a usable date");
            return Ok(EntryOutcome::Skipped);
        };

        let item = render_item(feed, link, published_at, entry);
        match self.db.insert(item).await {
            Ok(_) => Ok(EntryOutcome::Added),
            // Same link twice within one fetch: the first occurrence was stored
            Err(SpigotError::Database(DbError::DuplicateLink(_))) => Ok(EntryOutcome::Known),
            Err(e) => Err(e),
        }
    }
}

enum EntryOutcome {
    Added,
    Known,
    Skipped,
}

/// Render an entry into a storable item using the feed's templates
pub fn render_item(feed: &FeedConfig, link: &str, published_at: i64, entry: &RawEntry) -> NewItem {
    NewItem {
        feed_id: feed.feed_id.clone(),
        link: link.to_string(),
        message: template::render(&feed.message_format, entry),
        title: feed
            .title_format
            .as_deref()
            .map(|format| template::render(format, entry)),
        published_at,
    }
}
