//! Paced publishing of queued items
//!
//! One dispatch pass takes a snapshot of a feed's unposted items, oldest
//! first, and publishes them one at a time for as long as the feed's pacing
//! allows. Items already present on the account's timeline are marked posted
//! with the remote timestamp instead of being published again.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::db::Database;
use crate::error::Result;
use crate::pacing::{Clock, PacingPolicy, PacingState};
use crate::publishers::Publisher;
use crate::types::{Item, RecentPost};

/// Why a dispatch pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every queued item was handled
    QueueEmpty,
    /// The feed's interval has not elapsed yet
    Cooling { until: i64 },
    /// Publishing failed; the item stays queued for the next pass
    PublishFailed { error: String },
}

/// Outcome of one dispatch pass for one feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub feed_id: String,
    /// Items published during this pass
    pub posted: usize,
    /// Items found already published and marked without posting
    pub corrected: usize,
    pub stop: StopReason,
}

pub struct Dispatcher<'a> {
    db: &'a Database,
    publisher: &'a dyn Publisher,
    clock: &'a dyn Clock,
    check_duplicates: bool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(db: &'a Database, publisher: &'a dyn Publisher, clock: &'a dyn Clock) -> Self {
        Self {
            db,
            publisher,
            clock,
            check_duplicates: true,
        }
    }

    /// Toggle the comparison against the account's recent posts
    pub fn check_duplicates(mut self, enabled: bool) -> Self {
        self.check_duplicates = enabled;
        self
    }

    /// Run one dispatch pass for a feed
    ///
    /// Items inserted while the pass runs wait for the next pass.
    ///
    /// # Errors
    ///
    /// Only store failures are returned. A failed publish ends the pass with
    /// [`StopReason::PublishFailed`].
    pub async fn dispatch(&self, feed: &FeedConfig) -> Result<DispatchReport> {
        let queue = self.db.unposted(&feed.feed_id).await?;
        debug!(feed = %feed.feed_id, "{} items waiting", queue.len());

        let recent = if self.check_duplicates && !queue.is_empty() {
            self.recent_posts(&feed.account).await
        } else {
            Vec::new()
        };

        let pacing = PacingPolicy::new(self.db, &feed.feed_id, feed.interval_minutes);
        let mut queue = queue.into_iter();
        let mut posted = 0;
        let mut corrected = 0;

        let stop = loop {
            if let PacingState::Cooling { until } = pacing.state(self.clock.now()).await? {
                debug!(feed = %feed.feed_id, until, "Feed is cooling");
                break StopReason::Cooling { until };
            }

            let Some(item) = queue.next() else {
                break StopReason::QueueEmpty;
            };

            if let Some(remote) = find_published(&recent, &item) {
                info!(
                    feed = %feed.feed_id,
                    link = %item.link,
                    "Item was already published at {}, marking it posted",
                    remote.timestamp
                );
                self.db.mark_posted(&item.link, Some(remote.timestamp)).await?;
                corrected += 1;
                continue;
            }

            match self
                .publisher
                .publish(&feed.account, &item.message, item.title.as_deref())
                .await
            {
                Ok(post_id) => {
                    self.db.mark_posted(&item.link, Some(self.clock.now())).await?;
                    posted += 1;
                    info!(
                        feed = %feed.feed_id,
                        account = %feed.account,
                        publisher = self.publisher.name(),
                        post_id = %post_id,
                        "Posted {}",
                        item.link
                    );
                }
                Err(e) => {
                    warn!(
                        feed = %feed.feed_id,
                        account = %feed.account,
                        link = %item.link,
                        "Unable to post item: {}",
                        e
                    );
                    break StopReason::PublishFailed {
                        error: e.to_string(),
                    };
                }
            }
        };

        Ok(DispatchReport {
            feed_id: feed.feed_id.clone(),
            posted,
            corrected,
            stop,
        })
    }

    /// Dispatch several feeds one after another
    pub async fn dispatch_all(&self, feeds: &[FeedConfig]) -> Result<Vec<DispatchReport>> {
        let mut reports = Vec::with_capacity(feeds.len());
        for feed in feeds {
            reports.push(self.dispatch(feed).await?);
        }
        Ok(reports)
    }

    async fn recent_posts(&self, account: &str) -> Vec<RecentPost> {
        match self.publisher.recent_posts(account).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!(
                    account = %account,
                    "Unable to list recent posts, skipping duplicate check: {}",
                    e
                );
                Vec::new()
            }
        }
    }
}

/// Statuses come back as HTML, so compare with whitespace runs collapsed
fn find_published<'r>(recent: &'r [RecentPost], item: &Item) -> Option<&'r RecentPost> {
    let message = collapse_whitespace(&item.message);
    recent
        .iter()
        .find(|post| collapse_whitespace(&post.text) == message)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::FixedClock;
    use crate::publishers::mock::MockPublisher;
    use crate::types::NewItem;

    const FEED: &str = "http://example.com/feed.xml";
    const NOW: i64 = 1_700_000_000;

    fn feed(interval_minutes: u32) -> FeedConfig {
        FeedConfig {
            feed_id: FEED.to_string(),
            account: "main".to_string(),
            interval_minutes,
            message_format: "%title% %link%".to_string(),
            title_format: None,
        }
    }

    async fn queue(db: &Database, count: usize) {
        for n in 0..count {
            db.insert(NewItem {
                feed_id: FEED.to_string(),
                link: format!("http://example.com/post/{}", n),
                message: format!("Post {}", n),
                title: None,
                published_at: 1_000 + n as i64,
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_one_post_per_interval() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 3).await;
        let publisher = MockPublisher::success();
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .dispatch(&feed(60))
            .await
            .unwrap();

        assert_eq!(report.posted, 1);
        assert_eq!(report.stop, StopReason::Cooling { until: NOW + 3600 });
        assert_eq!(publisher.published_messages(), vec!["Post 0"]);
        assert_eq!(db.unposted(FEED).await.unwrap().len(), 2);
        let item = db.get("http://example.com/post/0").await.unwrap().unwrap();
        assert_eq!(item.posted_at, Some(NOW));
    }

    #[tokio::test]
    async fn test_next_pass_waits_for_interval() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 3).await;
        let publisher = MockPublisher::success();
        let clock = FixedClock::new(NOW);
        let dispatcher = Dispatcher::new(&db, &publisher, &clock);

        dispatcher.dispatch(&feed(60)).await.unwrap();

        clock.advance(3599);
        let early = dispatcher.dispatch(&feed(60)).await.unwrap();
        assert_eq!(early.posted, 0);

        clock.advance(1);
        let due = dispatcher.dispatch(&feed(60)).await.unwrap();
        assert_eq!(due.posted, 1);
        assert_eq!(publisher.published_messages(), vec!["Post 0", "Post 1"]);
    }

    #[tokio::test]
    async fn test_zero_interval_drains_queue() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 3).await;
        let publisher = MockPublisher::success();
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .dispatch(&feed(0))
            .await
            .unwrap();

        assert_eq!(report.posted, 3);
        assert_eq!(report.stop, StopReason::QueueEmpty);
        assert_eq!(
            publisher.published_messages(),
            vec!["Post 0", "Post 1", "Post 2"]
        );
        assert!(db.unposted(FEED).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_item_queued() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 3).await;
        let publisher = MockPublisher::fail_after(1, "instance unreachable");
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .dispatch(&feed(0))
            .await
            .unwrap();

        assert_eq!(report.posted, 1);
        match report.stop {
            StopReason::PublishFailed { error } => assert!(error.contains("instance unreachable")),
            other => panic!("Expected PublishFailed, got {:?}", other),
        }
        // The failed item and everything behind it stay queued
        let waiting: Vec<String> = db
            .unposted(FEED)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.link)
            .collect();
        assert_eq!(
            waiting,
            vec!["http://example.com/post/1", "http://example.com/post/2"]
        );
        assert_eq!(publisher.post_call_count(), 2);
    }

    #[tokio::test]
    async fn test_already_published_item_is_corrected() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 2).await;
        let remote_time = NOW - 7200;
        let publisher = MockPublisher::success().with_recent(
            "main",
            vec![RecentPost {
                text: "Post 0".to_string(),
                timestamp: remote_time,
            }],
        );
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .dispatch(&feed(60))
            .await
            .unwrap();

        assert_eq!(report.corrected, 1);
        assert_eq!(report.posted, 1);
        assert_eq!(publisher.published_messages(), vec!["Post 1"]);
        let item = db.get("http://example.com/post/0").await.unwrap().unwrap();
        assert_eq!(item.posted_at, Some(remote_time));
    }

    #[tokio::test]
    async fn test_correction_ignores_whitespace_from_html() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 1).await;
        let publisher = MockPublisher::success().with_recent(
            "main",
            vec![RecentPost {
                text: crate::publishers::mastodon::html_to_text("<p>Post&nbsp;0\n</p>"),
                timestamp: NOW - 60,
            }],
        );
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .dispatch(&feed(0))
            .await
            .unwrap();

        assert_eq!(report.corrected, 1);
        assert_eq!(report.posted, 0);
        assert!(publisher.published_messages().is_empty());
    }

    #[tokio::test]
    async fn test_recent_correction_pushes_back_pacing() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 2).await;
        let publisher = MockPublisher::success().with_recent(
            "main",
            vec![RecentPost {
                text: "Post 0".to_string(),
                timestamp: NOW - 60,
            }],
        );
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .dispatch(&feed(60))
            .await
            .unwrap();

        assert_eq!(report.corrected, 1);
        assert_eq!(report.posted, 0);
        assert_eq!(report.stop, StopReason::Cooling { until: NOW + 3540 });
        assert_eq!(publisher.post_call_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_timeline_still_publishes() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 1).await;
        let publisher = MockPublisher::success().with_failing_recent();
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .dispatch(&feed(60))
            .await
            .unwrap();

        assert_eq!(report.posted, 1);
        assert_eq!(publisher.recent_call_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_check_disabled() {
        let db = Database::in_memory().await.unwrap();
        queue(&db, 1).await;
        let publisher = MockPublisher::success().with_recent(
            "main",
            vec![RecentPost {
                text: "Post 0".to_string(),
                timestamp: NOW - 7200,
            }],
        );
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .check_duplicates(false)
            .dispatch(&feed(60))
            .await
            .unwrap();

        assert_eq!(report.corrected, 0);
        assert_eq!(report.posted, 1);
        assert_eq!(publisher.recent_call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_skips_timeline() {
        let db = Database::in_memory().await.unwrap();
        let publisher = MockPublisher::success();
        let clock = FixedClock::new(NOW);

        let report = Dispatcher::new(&db, &publisher, &clock)
            .dispatch(&feed(60))
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::QueueEmpty);
        assert_eq!(publisher.recent_call_count(), 0);
        assert_eq!(publisher.post_call_count(), 0);
    }

    #[test]
    fn test_stop_reason_serializes_with_tag() {
        let json = serde_json::to_value(StopReason::Cooling { until: 5 }).unwrap();
        assert_eq!(json["reason"], "cooling");
        assert_eq!(json["until"], 5);
    }
}
