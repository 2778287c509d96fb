//! Mock publisher for testing
//!
//! Records every publish call and can be told to fail, either always or after
//! a number of successful posts, and to report canned recent posts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{PublishError, Result};
use crate::publishers::Publisher;
use crate::types::RecentPost;

/// A message delivered through the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub account: String,
    pub message: String,
    pub title: Option<String>,
}

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,

    /// Number of publish calls that succeed before every later one fails;
    /// `None` never fails
    pub succeed_times: Option<usize>,

    /// Error to return on publish failure
    pub post_error: Option<String>,

    /// Recent posts per account
    pub recent: HashMap<String, Vec<RecentPost>>,

    /// Whether listing recent posts fails
    pub recent_fails: bool,

    pub post_call_count: Arc<Mutex<usize>>,
    pub recent_call_count: Arc<Mutex<usize>>,
    pub published: Arc<Mutex<Vec<Published>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            succeed_times: None,
            post_error: None,
            recent: HashMap::new(),
            recent_fails: false,
            post_call_count: Arc::new(Mutex::new(0)),
            recent_call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock publisher; clones share call counts and published messages
#[derive(Clone)]
pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A publisher that always succeeds
    pub fn success() -> Self {
        Self::new(MockConfig::default())
    }

    /// A publisher whose every publish fails
    pub fn failure(error: &str) -> Self {
        Self::fail_after(0, error)
    }

    /// Succeed `n` times, then fail
    pub fn fail_after(n: usize, error: &str) -> Self {
        Self::new(MockConfig {
            succeed_times: Some(n),
            post_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    /// Report `posts` as the recent posts of `account`
    pub fn with_recent(mut self, account: &str, posts: Vec<RecentPost>) -> Self {
        self.config.recent.insert(account.to_string(), posts);
        self
    }

    /// Make listing recent posts fail
    pub fn with_failing_recent(mut self) -> Self {
        self.config.recent_fails = true;
        self
    }

    pub fn post_call_count(&self) -> usize {
        *self.config.post_call_count.lock().unwrap()
    }

    pub fn recent_call_count(&self) -> usize {
        *self.config.recent_call_count.lock().unwrap()
    }

    pub fn published(&self) -> Vec<Published> {
        self.config.published.lock().unwrap().clone()
    }

    pub fn published_messages(&self) -> Vec<String> {
        self.published().into_iter().map(|p| p.message).collect()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, account: &str, message: &str, title: Option<&str>) -> Result<String> {
        let call = {
            let mut count = self.config.post_call_count.lock().unwrap();
            *count += 1;
            *count
        };

        if let Some(limit) = self.config.succeed_times {
            if call > limit {
                let error_msg = self
                    .config
                    .post_error
                    .clone()
                    .unwrap_or_else(|| "Mock publishing failed".to_string());
                return Err(PublishError::Posting(error_msg).into());
            }
        }

        self.config.published.lock().unwrap().push(Published {
            account: account.to_string(),
            message: message.to_string(),
            title: title.map(str::to_string),
        });

        Ok(format!("{}:mock-{}", self.config.name, uuid::Uuid::new_v4()))
    }

    async fn recent_posts(&self, account: &str) -> Result<Vec<RecentPost>> {
        *self.config.recent_call_count.lock().unwrap() += 1;

        if self.config.recent_fails {
            return Err(PublishError::Network("Mock timeline unavailable".to_string()).into());
        }

        Ok(self.config.recent.get(account).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
