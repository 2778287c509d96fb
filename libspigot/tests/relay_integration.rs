//! End-to-end relay batches against a local HTTP feed and a file-backed store

use httpmock::prelude::*;
use libspigot::feeds::mock::StaticFetcher;
use libspigot::pacing::FixedClock;
use libspigot::publishers::mock::MockPublisher;
use libspigot::{run_batch, Config, ConfigFile, Database, HttpFetcher, RecentPost, StopReason};
use tempfile::TempDir;

const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>http://example.com/</link>
    <description>Example feed</description>
    <item>
      <title>Third</title>
      <link>http://example.com/post/3</link>
      <pubDate>Thu, 03 Jul 2014 12:00:00 +0000</pubDate>
    </item>
    <item>
      <title>First</title>
      <link>http://example.com/post/1</link>
      <pubDate>Tue, 01 Jul 2014 12:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>http://example.com/post/2</link>
      <pubDate>Wed, 02 Jul 2014 12:00:00 +0000</pubDate>
    </item>
    <item>
      <title>Undated</title>
      <link>http://example.com/post/undated</link>
    </item>
  </channel>
</rss>
"#;

const START: i64 = 1_700_000_000;

fn config(feed_url: &str, db_path: &str, format: &str) -> Config {
    let toml = format!(
        r#"
[database]
path = "{db_path}"

[accounts.main]
instance = "https://mastodon.example"
token_file = "/dev/null"

[[feeds]]
url = "{feed_url}"
account = "main"
interval = 60
format = "{format}"
"#
    );
    Config::from_file(ConfigFile::parse(&toml).unwrap())
}

fn db_path(temp_dir: &TempDir) -> String {
    temp_dir
        .path()
        .join("spigot.db")
        .display()
        .to_string()
        .replace('\\', "/")
}

#[tokio::test]
async fn test_feed_drains_one_item_per_interval_across_restarts() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/feed.xml");
            then.status(200).body(RSS);
        })
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = config(
        &server.url("/feed.xml"),
        &db_path(&temp_dir),
        "%title% %link%",
    );
    let fetcher = HttpFetcher::new(&config.fetch).unwrap();
    let publisher = MockPublisher::success();
    let clock = FixedClock::new(START);

    {
        let db = Database::new(&config.database.path).await.unwrap();
        let report = run_batch(&config, &db, &fetcher, &publisher, &clock)
            .await
            .unwrap();

        assert_eq!(report.ingested[0].seen, 4);
        assert_eq!(report.ingested[0].added, 3);
        assert_eq!(report.ingested[0].skipped, 1);
        assert_eq!(report.items_posted(), 1);
        assert_eq!(
            report.dispatched[0].stop,
            StopReason::Cooling {
                until: START + 3600
            }
        );
    }

    // A new process opens the same store later
    clock.advance(3600);
    let db = Database::new(&config.database.path).await.unwrap();
    let report = run_batch(&config, &db, &fetcher, &publisher, &clock)
        .await
        .unwrap();

    assert_eq!(report.items_added(), 0);
    assert_eq!(report.items_posted(), 1);
    assert_eq!(
        publisher.published_messages(),
        vec![
            "First http://example.com/post/1",
            "Second http://example.com/post/2",
        ]
    );
    assert_eq!(db.unposted(&config.feeds[0].feed_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_legacy_placeholders_render_after_upgrade() {
    let temp_dir = TempDir::new().unwrap();
    let feed_url = "http://example.com/feed.xml";
    let config = config(feed_url, &db_path(&temp_dir), "$t ($l)");
    let entry = libspigot::RawEntry::new(Some("http://example.com/post/9".to_string()))
        .with_field("title", "Ninth")
        .with_published(100);
    let fetcher = StaticFetcher::new().with_entries(feed_url, vec![entry]);
    let publisher = MockPublisher::success();
    let clock = FixedClock::new(START);
    let db = Database::new(&config.database.path).await.unwrap();

    run_batch(&config, &db, &fetcher, &publisher, &clock)
        .await
        .unwrap();

    assert_eq!(
        publisher.published_messages(),
        vec!["Ninth (http://example.com/post/9)"]
    );
}

#[tokio::test]
async fn test_items_already_on_timeline_are_not_reposted() {
    let temp_dir = TempDir::new().unwrap();
    let feed_url = "http://example.com/feed.xml";
    let config = config(feed_url, &db_path(&temp_dir), "%title% %link%");
    let entries = (1..=2)
        .map(|n| {
            libspigot::RawEntry::new(Some(format!("http://example.com/post/{}", n)))
                .with_field("title", format!("Post {}", n))
                .with_published(n)
        })
        .collect();
    let fetcher = StaticFetcher::new().with_entries(feed_url, entries);
    // A previous run published the first item but crashed before recording it
    let publisher = MockPublisher::success().with_recent(
        "main",
        vec![RecentPost {
            text: "Post 1 http://example.com/post/1".to_string(),
            timestamp: START - 7200,
        }],
    );
    let clock = FixedClock::new(START);
    let db = Database::new(&config.database.path).await.unwrap();

    let report = run_batch(&config, &db, &fetcher, &publisher, &clock)
        .await
        .unwrap();

    assert_eq!(report.items_corrected(), 1);
    assert_eq!(report.items_posted(), 1);
    assert_eq!(
        publisher.published_messages(),
        vec!["Post 2 http://example.com/post/2"]
    );
    let corrected = db.get("http://example.com/post/1").await.unwrap().unwrap();
    assert_eq!(corrected.posted_at, Some(START - 7200));
}

#[tokio::test]
async fn test_feed_error_status_leaves_store_untouched() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/feed.xml");
            then.status(503);
        })
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = config(
        &server.url("/feed.xml"),
        &db_path(&temp_dir),
        "%title% %link%",
    );
    let fetcher = HttpFetcher::new(&config.fetch).unwrap();
    let publisher = MockPublisher::success();
    let clock = FixedClock::new(START);
    let db = Database::new(&config.database.path).await.unwrap();

    let report = run_batch(&config, &db, &fetcher, &publisher, &clock)
        .await
        .unwrap();

    assert_eq!(report.failed_feeds(), vec![server.url("/feed.xml").as_str()]);
    assert_eq!(db.count(None).await.unwrap(), 0);
    assert_eq!(publisher.post_call_count(), 0);
}
