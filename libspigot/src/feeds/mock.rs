//! In-memory feed fetcher for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::FeedError;
use crate::feeds::FeedFetcher;
use crate::types::RawEntry;

/// Serves canned entries per URL; unknown URLs fail to fetch
#[derive(Clone, Default)]
pub struct StaticFetcher {
    feeds: Arc<Mutex<HashMap<String, Result<Vec<RawEntry>, FeedError>>>>,
    fetch_count: Arc<Mutex<usize>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(self, url: &str, entries: Vec<RawEntry>) -> Self {
        self.set_entries(url, entries);
        self
    }

    pub fn with_failure(self, url: &str, reason: &str) -> Self {
        self.feeds.lock().unwrap().insert(
            url.to_string(),
            Err(FeedError::Fetch {
                url: url.to_string(),
                reason: reason.to_string(),
            }),
        );
        self
    }

    /// Replace what `url` serves from now on
    pub fn set_entries(&self, url: &str, entries: Vec<RawEntry>) {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(entries));
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FeedError> {
        *self.fetch_count.lock().unwrap() += 1;

        self.feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(FeedError::Fetch {
                    url: url.to_string(),
                    reason: "no such feed".to_string(),
                })
            })
    }
}
