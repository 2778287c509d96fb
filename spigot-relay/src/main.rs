//! spigot - relay syndicated feeds to Mastodon-compatible accounts
//!
//! Each run fetches every configured feed, stores entries it has not seen
//! before, and posts queued entries as each feed's interval allows.

use clap::Parser;
use libspigot::config::resolve_config_path;
use libspigot::logging::{LogFormat, LoggingConfig};
use libspigot::{
    run_batch, BatchReport, Clock, Config, Database, HttpFetcher, MastodonPublisher,
    PacingPolicy, Result, SpigotError, SystemClock,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "spigot")]
#[command(version)]
#[command(about = "Relay feed entries to Mastodon at a steady pace")]
#[command(long_about = "\
spigot - Relay feed entries to Mastodon at a steady pace

DESCRIPTION:
    spigot polls the feeds listed in its configuration, remembers every
    entry it has seen, and posts new entries to the configured accounts.
    Each feed posts at most once per its interval; entries that arrive
    faster wait in the local queue, oldest first.

USAGE:
    # One batch, suitable for cron
    spigot

    # Keep running, polling every 10 minutes
    spigot --daemon --poll-interval 10m

    # Machine-readable batch report on stdout
    spigot --json

SIGNALS:
    SIGTERM, SIGINT - Stop the daemon after the current batch

CONFIGURATION:
    Configuration file: $SPIGOT_CONFIG or ~/.config/spigot/config.toml
    Use spigot-setup to add accounts and feeds.

EXIT CODES:
    0 - Success (unreachable feeds and failed posts are retried next run)
    1 - Runtime error
    2 - Configuration error
    3 - Database error
")]
struct Cli {
    /// Configuration file
    #[arg(short, long, value_name = "PATH", env = "SPIGOT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log output format (text, json, pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Keep running and repeat the batch every poll interval
    #[arg(short, long)]
    daemon: bool,

    /// Time between batches in daemon mode (e.g. 90s, 15m, 1h)
    #[arg(long, value_name = "DURATION", default_value = "15m")]
    poll_interval: humantime::Duration,

    /// Print each batch report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Show each feed's queue and pacing, then exit without fetching or posting
    #[arg(long, conflicts_with = "daemon")]
    status: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env(cli.verbose);
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => resolve_config_path()?,
    };
    let config = Config::load_from_path(&config_path)?;
    if config.feeds.is_empty() {
        warn!("No usable feeds configured in {}", config_path.display());
    }

    let db = Database::new(&config.database.path).await?;
    if cli.status {
        return print_status(&config, &db, cli.json).await;
    }

    let fetcher = HttpFetcher::new(&config.fetch)?;

    let (mut publisher, failures) = MastodonPublisher::from_accounts(&config.accounts);
    for (account, e) in &failures {
        warn!(account = %account, "Account unavailable, its feeds will not post: {}", e);
    }
    publisher.refresh_limits().await;

    if !cli.daemon {
        let report = run_batch(&config, &db, &fetcher, &publisher, &SystemClock).await?;
        print_report(&report, cli.json)?;
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval: Duration = cli.poll_interval.into();
    info!("spigot daemon starting, polling every {}", cli.poll_interval);

    while !shutdown.load(Ordering::Relaxed) {
        match run_batch(&config, &db, &fetcher, &publisher, &SystemClock).await {
            Ok(report) => print_report(&report, cli.json)?,
            Err(e) if e.is_transient() => error!("Batch failed: {}", e),
            Err(e) => return Err(e),
        }

        wait_for_next_batch(poll_interval, &shutdown).await;
    }

    info!("spigot daemon stopped");
    Ok(())
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(report)
            .map_err(|e| SpigotError::InvalidInput(format!("Failed to encode report: {}", e)))?;
        println!("{}", line);
    }

    for feed in report.failed_feeds() {
        warn!(feed = %feed, "Feed had errors this batch, will retry next batch");
    }
    Ok(())
}

async fn print_status(config: &Config, db: &Database, json: bool) -> Result<()> {
    let now = SystemClock.now();
    let mut rows = Vec::with_capacity(config.feeds.len());

    for feed in &config.feeds {
        let total = db.count(Some(&feed.feed_id)).await?;
        let queued = db.unposted(&feed.feed_id).await?.len();
        let next_allowed = PacingPolicy::new(db, &feed.feed_id, feed.interval_minutes)
            .next_allowed()
            .await?
            .filter(|at| *at > now);

        if !json {
            let next = match next_allowed {
                Some(at) => {
                    let wait = Duration::from_secs((at - now).unsigned_abs());
                    format!("cooling for {}", humantime::format_duration(wait))
                }
                None => "ready".to_string(),
            };
            println!(
                "{} -> {}: {} items, {} queued, {}",
                feed.feed_id, feed.account, total, queued, next
            );
        }

        rows.push(serde_json::json!({
            "feed_id": feed.feed_id,
            "account": feed.account,
            "items": total,
            "queued": queued,
            "next_allowed": next_allowed,
        }));
    }

    if json {
        println!("{}", serde_json::Value::Array(rows));
    }
    Ok(())
}

/// Sleep for one poll interval, waking early on shutdown
async fn wait_for_next_batch(poll_interval: Duration, shutdown: &AtomicBool) {
    let tick = Duration::from_secs(1);
    let mut waited = Duration::ZERO;
    while waited < poll_interval {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let step = tick.min(poll_interval - waited);
        sleep(step).await;
        waited += step;
    }
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SpigotError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping after the current batch");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}
