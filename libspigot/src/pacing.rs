//! Per-feed posting pace
//!
//! A feed is Ready when nothing has been posted from it yet, or when its
//! interval has fully elapsed since the latest post; otherwise it is Cooling.
//! There is no state of its own: every check is derived from the item store.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::Result;
use crate::Database;

/// Source of the current time (Unix seconds)
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and dry runs
#[derive(Debug, Default)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingState {
    Ready,
    /// Posting resumes at the contained time
    Cooling { until: i64 },
}

impl PacingState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PacingState::Ready)
    }
}

/// Pace checks for one feed
pub struct PacingPolicy<'a> {
    db: &'a Database,
    feed_id: &'a str,
    interval_minutes: u32,
}

impl<'a> PacingPolicy<'a> {
    pub fn new(db: &'a Database, feed_id: &'a str, interval_minutes: u32) -> Self {
        Self {
            db,
            feed_id,
            interval_minutes,
        }
    }

    /// Earliest time the next post is allowed, `None` if nothing was posted yet
    pub async fn next_allowed(&self) -> Result<Option<i64>> {
        let latest = self.db.latest_posted(self.feed_id).await?;
        Ok(latest.map(|posted| posted + interval_seconds(self.interval_minutes)))
    }

    pub async fn state(&self, now: i64) -> Result<PacingState> {
        Ok(match self.next_allowed().await? {
            Some(until) if now < until => PacingState::Cooling { until },
            _ => PacingState::Ready,
        })
    }

    /// Check if the feed may post at `now`
    pub async fn ok_to_post(&self, now: i64) -> Result<bool> {
        Ok(self.state(now).await?.is_ready())
    }
}

fn interval_seconds(interval_minutes: u32) -> i64 {
    i64::from(interval_minutes) * 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewItem;

    const FEED: &str = "http://example.com/feed.xml";

    async fn db_with_items(count: u32) -> Database {
        let db = Database::in_memory().await.unwrap();
        for n in 0..count {
            db.insert(NewItem {
                feed_id: FEED.to_string(),
                link: format!("http://example.com/post/{}", n),
                message: format!("Post {}", n),
                title: None,
                published_at: i64::from(n),
            })
            .await
            .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_never_posted_feed_is_ready() {
        let db = db_with_items(1).await;
        let policy = PacingPolicy::new(&db, FEED, 60);

        assert_eq!(policy.next_allowed().await.unwrap(), None);
        assert!(policy.ok_to_post(0).await.unwrap());
    }

    #[tokio::test]
    async fn test_cooling_until_interval_elapses() {
        let db = db_with_items(1).await;
        let posted = 1_000_000;
        db.mark_posted("http://example.com/post/0", Some(posted))
            .await
            .unwrap();
        let policy = PacingPolicy::new(&db, FEED, 60);

        for now in [posted, posted + 1, posted + 1800, posted + 3599] {
            assert!(
                !policy.ok_to_post(now).await.unwrap(),
                "Should be cooling at T+{}",
                now - posted
            );
        }
        assert_eq!(
            policy.state(posted + 10).await.unwrap(),
            PacingState::Cooling {
                until: posted + 3600
            }
        );

        assert!(policy.ok_to_post(posted + 3600).await.unwrap());
        assert!(policy.ok_to_post(posted + 86_400).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_interval_is_always_ready() {
        let db = db_with_items(1).await;
        let posted = 1_000_000;
        db.mark_posted("http://example.com/post/0", Some(posted))
            .await
            .unwrap();
        let policy = PacingPolicy::new(&db, FEED, 0);

        assert!(policy.ok_to_post(posted).await.unwrap());
        assert!(policy.ok_to_post(posted + 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_latest_post_governs() {
        let db = db_with_items(2).await;
        db.mark_posted("http://example.com/post/0", Some(1_000))
            .await
            .unwrap();
        db.mark_posted("http://example.com/post/1", Some(5_000))
            .await
            .unwrap();
        let policy = PacingPolicy::new(&db, FEED, 10);

        assert_eq!(policy.next_allowed().await.unwrap(), Some(5_600));
        assert!(!policy.ok_to_post(5_599).await.unwrap());
    }

    #[tokio::test]
    async fn test_feeds_are_independent() {
        let db = db_with_items(1).await;
        db.mark_posted("http://example.com/post/0", Some(1_000))
            .await
            .unwrap();

        let other = PacingPolicy::new(&db, "http://other.example.com/rss", 60);
        assert!(other.ok_to_post(1_000).await.unwrap());
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(100);
        clock.advance(60);
        assert_eq!(clock.now(), 160);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn test_system_clock_is_current() {
        let now = chrono::Utc::now().timestamp();
        assert!((SystemClock.now() - now).abs() <= 1);
    }
}
