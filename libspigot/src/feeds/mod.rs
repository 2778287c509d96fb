//! Feed fetching
//!
//! A [`FeedFetcher`] turns a feed URL into [`RawEntry`] values in feed order.
//! Fetch and parse failures are returned as [`FeedError`] and never escape the
//! ingestion step for that feed.

use async_trait::async_trait;
use feed_rs::model::Entry;

use crate::error::FeedError;
use crate::types::RawEntry;

pub mod http;
pub mod mock;

pub use http::HttpFetcher;

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch and parse the feed at `url`
    async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FeedError>;
}

/// Parse an RSS, Atom or JSON Feed document
pub fn parse_feed(url: &str, body: &[u8]) -> Result<Vec<RawEntry>, FeedError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| FeedError::Parse {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    Ok(feed.entries.into_iter().map(raw_entry).collect())
}

fn raw_entry(entry: Entry) -> RawEntry {
    let mut raw = RawEntry::new(entry.links.first().map(|l| l.href.clone()));
    raw.published = entry.published.map(|dt| dt.timestamp());
    raw.updated = entry.updated.map(|dt| dt.timestamp());

    if let Some(title) = entry.title {
        raw.push_field("title", title.content);
    }
    // The primary link was recorded by RawEntry::new
    for link in entry.links.iter().skip(1) {
        raw.push_field("link", link.href.clone());
    }
    if let Some(summary) = entry.summary {
        raw.push_field("summary", summary.content);
    }
    if let Some(body) = entry.content.and_then(|c| c.body) {
        raw.push_field("content", body);
    }
    for media in entry.media {
        if let Some(description) = media.description {
            raw.push_field("content", description.content);
        }
    }
    for author in entry.authors {
        raw.push_field("author", author.name);
    }
    for category in entry.categories {
        raw.push_field("category", category.term);
    }
    if !entry.id.is_empty() {
        raw.push_field("id", entry.id);
    }

    raw
}
