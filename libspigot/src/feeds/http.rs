//! HTTP feed fetcher

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::{FeedError, Result};
use crate::feeds::{parse_feed, FeedFetcher};
use crate::types::RawEntry;

/// Fetches feeds over HTTP(S); `file://` URLs are read from disk
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()
            .map_err(|e| FeedError::Fetch {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    async fn read(&self, url: &str) -> std::result::Result<Vec<u8>, FeedError> {
        let fetch_error = |reason: String| FeedError::Fetch {
            url: url.to_string(),
            reason,
        };

        let parsed = url::Url::parse(url).map_err(|e| fetch_error(e.to_string()))?;
        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| fetch_error("not a local path".to_string()))?;
            return tokio::fs::read(&path)
                .await
                .map_err(|e| fetch_error(e.to_string()));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<RawEntry>, FeedError> {
        let body = self.read(url).await?;
        debug!(feed = %url, bytes = body.len(), "Fetched feed");
        parse_feed(url, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title><link>http://example.com/</link><description>d</description>
<item><title>One</title><link>http://example.com/1</link><pubDate>Tue, 01 Jul 2014 12:15:00 GMT</pubDate></item>
</channel></rss>"#;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_over_http() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/feed.xml");
                then.status(200)
                    .header("content-type", "application/rss+xml")
                    .body(RSS);
            })
            .await;

        let entries = fetcher().fetch(&server.url("/feed.xml")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("title"), Some("One"));
    }

    #[tokio::test]
    async fn test_http_error_status_is_fetch_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.xml");
                then.status(404);
            })
            .await;

        let result = fetcher().fetch(&server.url("/missing.xml")).await;
        match result {
            Err(FeedError::Fetch { reason, .. }) => assert!(reason.contains("404")),
            other => panic!("Expected fetch error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("feed.xml");
        std::fs::write(&path, RSS).unwrap();
        let url = url::Url::from_file_path(&path).unwrap();

        let entries = fetcher().fetch(url.as_str()).await.unwrap();
        assert_eq!(entries[0].link.as_deref(), Some("http://example.com/1"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_fetch_error() {
        let result = fetcher().fetch("http://127.0.0.1:9/feed.xml").await;
        assert!(matches!(result, Err(FeedError::Fetch { .. })));
    }
}
