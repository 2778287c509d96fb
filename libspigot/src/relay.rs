//! One relay batch: ingest every feed, then dispatch every feed
//!
//! Feeds are handled one after another. A feed that cannot be fetched or an
//! account that refuses a post only affects that feed; a failing item store
//! aborts the batch.

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::dispatch::{DispatchReport, Dispatcher, StopReason};
use crate::error::Result;
use crate::feeds::FeedFetcher;
use crate::ingest::{IngestReport, Ingester};
use crate::pacing::Clock;
use crate::publishers::Publisher;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub ingested: Vec<IngestReport>,
    pub dispatched: Vec<DispatchReport>,
}

impl BatchReport {
    pub fn items_added(&self) -> usize {
        self.ingested.iter().map(|r| r.added).sum()
    }

    pub fn items_posted(&self) -> usize {
        self.dispatched.iter().map(|r| r.posted).sum()
    }

    pub fn items_corrected(&self) -> usize {
        self.dispatched.iter().map(|r| r.corrected).sum()
    }

    /// Feeds that could not be fetched or whose publishing failed
    pub fn failed_feeds(&self) -> Vec<&str> {
        let fetch = self
            .ingested
            .iter()
            .filter(|r| r.fetch_failed())
            .map(|r| r.feed_id.as_str());
        let publish = self
            .dispatched
            .iter()
            .filter(|r| matches!(r.stop, StopReason::PublishFailed { .. }))
            .map(|r| r.feed_id.as_str());

        let mut failed: Vec<&str> = fetch.chain(publish).collect();
        failed.sort_unstable();
        failed.dedup();
        failed
    }
}

/// Run one batch over every configured feed
///
/// # Errors
///
/// Returns the first item store failure; every other failure is recorded in
/// the report.
pub async fn run_batch(
    config: &Config,
    db: &Database,
    fetcher: &dyn FeedFetcher,
    publisher: &dyn Publisher,
    clock: &dyn Clock,
) -> Result<BatchReport> {
    let ingested = Ingester::new(db, fetcher).ingest_all(&config.feeds).await?;

    let dispatched = Dispatcher::new(db, publisher, clock)
        .check_duplicates(config.dispatch.check_duplicates)
        .dispatch_all(&config.feeds)
        .await?;

    let report = BatchReport {
        ingested,
        dispatched,
    };
    info!(
        feeds = config.feeds.len(),
        added = report.items_added(),
        posted = report.items_posted(),
        corrected = report.items_corrected(),
        "Batch complete"
    );
    Ok(report)
}
