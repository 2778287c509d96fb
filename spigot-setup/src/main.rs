//! spigot-setup - manage the spigot configuration file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use libspigot::config::{
    resolve_config_path, AccountConfig, ConfigFile, FeedSection, DEFAULT_FORMAT,
};
use libspigot::{template, Config};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "spigot-setup")]
#[command(version)]
#[command(about = "Add accounts and feeds to the spigot configuration", long_about = None)]
struct Cli {
    /// Configuration file (created if missing)
    #[arg(short, long, value_name = "PATH", env = "SPIGOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add or replace a destination account
    AddAccount {
        /// Name feeds use to refer to this account
        #[arg(long)]
        name: String,

        /// Instance URL, e.g. https://mastodon.social
        #[arg(long)]
        instance: String,

        /// File holding the account's access token
        #[arg(long, value_name = "PATH")]
        token_file: String,
    },

    /// Add a feed, replacing any feed with the same URL
    AddFeed {
        #[arg(long)]
        url: String,

        /// Account the feed posts to
        #[arg(long)]
        account: String,

        /// Minimum minutes between two posts from this feed
        #[arg(long)]
        interval: u32,

        /// Message template, e.g. "%title% %link%"
        #[arg(long)]
        format: Option<String>,

        /// Title template, for destinations that support titles
        #[arg(long)]
        title_format: Option<String>,
    },

    /// Rewrite pre-2.2 $t/$l placeholders as %title%/%link%
    Upgrade,

    /// Print the configuration and the feeds that will be polled
    Show,
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        error!("Setup failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let path = match cli.config {
        Some(path) => path,
        None => resolve_config_path()?,
    };

    match cli.command {
        Command::AddAccount {
            name,
            instance,
            token_file,
        } => add_account(&path, name, instance, token_file),
        Command::AddFeed {
            url,
            account,
            interval,
            format,
            title_format,
        } => add_feed(
            &path,
            FeedSection {
                url: Some(url),
                account: Some(account),
                interval: Some(i64::from(interval)),
                format,
                title_format,
                ..Default::default()
            },
        ),
        Command::Upgrade => upgrade(&path),
        Command::Show => show(&path),
    }
}

/// Load the file at `path`, or start an empty configuration if it does not exist
fn load_or_default(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        debug!(path = %path.display(), "No configuration yet, starting empty");
        return Ok(ConfigFile::default());
    }
    ConfigFile::load_from_path(path)
        .with_context(|| format!("Could not load {}", path.display()))
}

fn add_account(path: &Path, name: String, instance: String, token_file: String) -> Result<()> {
    let mut file = load_or_default(path)?;

    let token_path = shellexpand::tilde(&token_file).to_string();
    if !Path::new(&token_path).exists() {
        eprintln!(
            "Warning: token file {} does not exist yet; create it before running spigot",
            token_path
        );
    }

    file.add_account(
        &name,
        AccountConfig {
            instance: instance.clone(),
            token_file,
        },
    );
    file.save_to_path(path)?;

    println!("✓ Account '{}' on {} saved to {}", name, instance, path.display());
    Ok(())
}

fn add_feed(path: &Path, feed: FeedSection) -> Result<()> {
    let mut file = load_or_default(path)?;

    let url = feed.url.clone().unwrap_or_default();
    url::Url::parse(&url).with_context(|| format!("'{}' is not a valid feed URL", url))?;
    let format = feed
        .format
        .clone()
        .unwrap_or_else(|| DEFAULT_FORMAT.to_string());

    file.add_feed(feed)?;
    file.save_to_path(path)?;

    println!("✓ Feed {} saved to {}", url, path.display());
    println!(
        "  Messages use: {}",
        template::placeholders(&format).join(", ")
    );
    Ok(())
}

fn upgrade(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("No configuration at {}", path.display());
    }
    let mut file = load_or_default(path)?;

    if file.upgrade_legacy() {
        file.save_to_path(path)?;
        println!("✓ Rewrote legacy placeholders in {}", path.display());
    } else {
        println!("Nothing to upgrade in {}", path.display());
    }
    Ok(())
}

fn show(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("No configuration at {}", path.display());
    }
    let file = load_or_default(path)?;
    if file.has_legacy_placeholders() {
        eprintln!("Note: this configuration uses $t/$l placeholders; run `spigot-setup upgrade`");
    }
    let rendered = toml::to_string_pretty(&file).context("Could not render configuration")?;

    println!("# {}", path.display());
    println!("{}", rendered.trim_end());

    let config = Config::from_file(file.clone());
    println!();
    println!(
        "{} of {} feeds will be polled:",
        config.feeds.len(),
        file.feeds.len()
    );
    for feed in &config.feeds {
        println!(
            "  {} -> {} every {} min",
            feed.feed_id, feed.account, feed.interval_minutes
        );
    }
    Ok(())
}
