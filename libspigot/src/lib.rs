//! Spigot - a rate-limited feed relay for the fediverse
//!
//! This library polls syndicated feeds, remembers every entry it has seen in a
//! local SQLite store, and republishes unposted entries to Mastodon-compatible
//! accounts no faster than each feed's configured interval.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod feeds;
pub mod ingest;
pub mod logging;
pub mod pacing;
pub mod publishers;
pub mod relay;
pub mod template;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigFile, FeedConfig};
pub use db::Database;
pub use dispatch::{DispatchReport, Dispatcher, StopReason};
pub use error::{Result, SpigotError};
pub use feeds::{FeedFetcher, HttpFetcher};
pub use ingest::{IngestReport, Ingester};
pub use pacing::{Clock, PacingPolicy, PacingState, SystemClock};
pub use publishers::{MastodonPublisher, Publisher};
pub use relay::{run_batch, BatchReport};
pub use types::{Item, NewItem, RawEntry, RecentPost};
