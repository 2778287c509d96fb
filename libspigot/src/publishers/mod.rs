//! Publishing to destination accounts
//!
//! A [`Publisher`] delivers rendered messages to named accounts and can list
//! an account's recent posts, which the dispatch loop uses to detect items
//! that were published by an earlier run that crashed before recording it.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::RecentPost;

pub mod mastodon;

// Public for integration tests
pub mod mock;

pub use mastodon::MastodonPublisher;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `message` to `account` and return the remote post id
    ///
    /// `title` is only used by publishers that support a subject line.
    ///
    /// # Errors
    ///
    /// Returns a `PublishError` variant when the account is unknown, the
    /// content is rejected, or the remote service cannot be reached.
    async fn publish(&self, account: &str, message: &str, title: Option<&str>) -> Result<String>;

    /// Recent posts of `account`, newest first
    ///
    /// Publishers that cannot list posts return an empty list, which turns
    /// duplicate correction off.
    async fn recent_posts(&self, _account: &str) -> Result<Vec<RecentPost>> {
        Ok(Vec::new())
    }

    /// Lowercase identifier for logs (e.g. "mastodon")
    fn name(&self) -> &str;
}
