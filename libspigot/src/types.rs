//! Core data types for Spigot

use serde::{Deserialize, Serialize};

/// One syndicated entry as persisted in the item store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// URL of the feed the entry came from
    pub feed_id: String,
    /// Canonical entry URL, the identity key for deduplication
    pub link: String,
    /// Rendered outgoing text
    pub message: String,
    /// Rendered title, for publishers with a subject line
    pub title: Option<String>,
    /// Original publication time (Unix seconds)
    pub published_at: i64,
    /// Delivery time (Unix seconds), `None` while queued
    pub posted_at: Option<i64>,
}

impl Item {
    pub fn is_posted(&self) -> bool {
        self.posted_at.is_some()
    }
}

/// An item about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub feed_id: String,
    pub link: String,
    pub message: String,
    pub title: Option<String>,
    pub published_at: i64,
}

impl From<NewItem> for Item {
    fn from(new: NewItem) -> Self {
        Item {
            feed_id: new.feed_id,
            link: new.link,
            message: new.message,
            title: new.title,
            published_at: new.published_at,
            posted_at: None,
        }
    }
}

/// A feed entry as delivered by a feed fetcher, before rendering
///
/// Fields are kept as an ordered multi-map: an entry can carry several
/// `content` or `category` values, and lookups return the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub link: Option<String>,
    /// Explicit publication time (Unix seconds)
    pub published: Option<i64>,
    /// Last-updated time (Unix seconds)
    pub updated: Option<i64>,
    fields: Vec<(String, String)>,
}

impl RawEntry {
    pub fn new(link: Option<String>) -> Self {
        let mut entry = Self::default();
        if let Some(link) = link {
            entry.push_field("link", link.clone());
            entry.link = Some(link);
        }
        entry
    }

    pub fn with_published(mut self, published: i64) -> Self {
        self.published = Some(published);
        self
    }

    pub fn with_updated(mut self, updated: i64) -> Self {
        self.updated = Some(updated);
        self
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push_field(name, value);
        self
    }

    pub fn push_field(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_string(), value.into()));
    }

    /// First value recorded for `name`
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Publication time, falling back to the last-updated time
    pub fn timestamp(&self) -> Option<i64> {
        self.published.or(self.updated)
    }
}

/// A post already present on the destination account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentPost {
    /// Plain text of the post
    pub text: String,
    /// Creation time (Unix seconds)
    pub timestamp: i64,
}
