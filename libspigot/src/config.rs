//! Configuration management for Spigot
//!
//! [`ConfigFile`] is the on-disk TOML record and round-trips through
//! load/save unchanged. [`Config`] is the validated, immutable view the relay
//! runs from; it is built once at startup and never mutated afterwards.

use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};
use crate::template;

/// Message template used when a feed does not set `format`
pub const DEFAULT_FORMAT: &str = "%title% %link%";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,
    #[serde(
        default,
        deserialize_with = "deserialize_feeds",
        serialize_with = "serialize_feeds"
    )]
    pub feeds: Vec<FeedSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/spigot/spigot.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Compare queued messages with the account's recent posts before publishing
    #[serde(default = "default_true")]
    pub check_duplicates: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            check_duplicates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("spigot/", env!("CARGO_PKG_VERSION")).to_string()
}

/// A destination account on a Mastodon-compatible instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub instance: String,
    pub token_file: String,
}

/// A `[[feeds]]` table as written on disk; every attribute may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Minimum minutes between two posts from this feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_format: Option<String>,
    /// Why the table could not be read, if it could not
    #[serde(skip)]
    pub invalid: Option<String>,
    /// The table as found, written back unchanged when `invalid` is set
    #[serde(skip)]
    pub raw: Option<toml::Value>,
}

impl FeedSection {
    fn from_value(value: toml::Value) -> Self {
        match value.clone().try_into::<FeedSection>() {
            Ok(section) => section,
            Err(e) => Self {
                url: value.get("url").and_then(|v| v.as_str()).map(str::to_string),
                invalid: Some(e.message().to_string()),
                raw: Some(value),
                ..Default::default()
            },
        }
    }
}

/// Read each `[[feeds]]` table on its own so one bad table cannot fail the file
fn deserialize_feeds<'de, D>(deserializer: D) -> std::result::Result<Vec<FeedSection>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<toml::Value>::deserialize(deserializer)?;
    Ok(values.into_iter().map(FeedSection::from_value).collect())
}

fn serialize_feeds<S>(feeds: &[FeedSection], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(feeds.len()))?;
    for feed in feeds {
        match &feed.raw {
            Some(raw) => seq.serialize_element(raw)?,
            None => seq.serialize_element(feed)?,
        }
    }
    seq.end()
}

impl ConfigFile {
    /// Load the configuration file from the resolved default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(file)
    }

    /// Save to the resolved default location
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = resolve_config_path()?;
        self.save_to_path(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::SerializeError)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })?;

        debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Add or replace an account
    pub fn add_account(&mut self, name: &str, account: AccountConfig) {
        self.accounts.insert(name.to_string(), account);
    }

    /// Add a feed, replacing any feed with the same URL
    pub fn add_feed(&mut self, feed: FeedSection) -> Result<()> {
        let url = feed
            .url
            .clone()
            .ok_or_else(|| ConfigError::MissingField("url".to_string()))?;

        if let Some(account) = &feed.account {
            if !self.accounts.contains_key(account) {
                return Err(ConfigError::UnknownAccount(account.clone()).into());
            }
        }

        match self
            .feeds
            .iter_mut()
            .find(|f| f.url.as_deref() == Some(url.as_str()))
        {
            Some(existing) => *existing = feed,
            None => self.feeds.push(feed),
        }
        Ok(())
    }

    /// Rewrite pre-2.2 `$t`/`$l` placeholders in every feed template
    ///
    /// Returns true if anything changed.
    pub fn upgrade_legacy(&mut self) -> bool {
        let mut changed = false;
        for feed in &mut self.feeds {
            for template in [&mut feed.format, &mut feed.title_format]
                .into_iter()
                .flatten()
            {
                if let Some(upgraded) = template::upgrade_legacy_placeholders(template) {
                    *template = upgraded;
                    changed = true;
                }
            }
        }
        changed
    }

    pub fn has_legacy_placeholders(&self) -> bool {
        self.feeds.iter().any(|f| {
            [&f.format, &f.title_format]
                .into_iter()
                .flatten()
                .any(|t| template::has_legacy_placeholders(t))
        })
    }
}

/// Validated, read-only configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub fetch: FetchConfig,
    pub accounts: BTreeMap<String, AccountConfig>,
    pub feeds: Vec<FeedConfig>,
}

/// A feed ready to be polled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Feed URL, also the feed's identity in the item store
    pub feed_id: String,
    pub account: String,
    pub interval_minutes: u32,
    pub message_format: String,
    pub title_format: Option<String>,
}

impl Config {
    /// Load and validate the configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading configuration");
        let file = ConfigFile::load_from_path(path)?;
        Ok(Self::from_file(file))
    }

    /// Validate a configuration record
    ///
    /// Feeds with missing or invalid attributes are left out with a warning;
    /// they never make the whole configuration unusable.
    pub fn from_file(mut file: ConfigFile) -> Self {
        if file.upgrade_legacy() {
            warn!("Configuration uses pre-2.2 $t/$l placeholders; run `spigot-setup upgrade` to rewrite it");
        }

        let mut feeds = Vec::with_capacity(file.feeds.len());
        for (index, section) in file.feeds.iter().enumerate() {
            if [&section.format, &section.title_format]
                .into_iter()
                .flatten()
                .any(|t| template::mixes_placeholder_styles(t))
            {
                warn!(index, "Feed template mixes $t/$l with %name% placeholders; $ text is kept literally");
            }
            match validate_feed(section, &file.accounts) {
                Ok(feed) => {
                    debug!(
                        feed = %feed.feed_id,
                        account = %feed.account,
                        interval = feed.interval_minutes,
                        "Added feed to poll list"
                    );
                    feeds.push(feed);
                }
                Err(e) => warn!(index, "Skipping feed: {}", e),
            }
        }

        if feeds.is_empty() {
            warn!("No usable feeds found in configuration");
        } else {
            info!("Found {} feed(s) to poll", feeds.len());
        }

        Self {
            database: file.database,
            dispatch: file.dispatch,
            fetch: file.fetch,
            accounts: file.accounts,
            feeds,
        }
    }
}

fn validate_feed(
    section: &FeedSection,
    accounts: &BTreeMap<String, AccountConfig>,
) -> std::result::Result<FeedConfig, ConfigError> {
    if let Some(reason) = &section.invalid {
        let url = section.url.as_deref().unwrap_or("without url");
        return Err(ConfigError::Invalid(format!("feed {}: {}", url, reason)));
    }

    let url = section
        .url
        .clone()
        .ok_or_else(|| ConfigError::MissingField("url".to_string()))?;
    url::Url::parse(&url).map_err(|e| ConfigError::Invalid(format!("url {}: {}", url, e)))?;

    let account = section
        .account
        .clone()
        .ok_or_else(|| ConfigError::MissingField(format!("account (feed {})", url)))?;
    if !accounts.contains_key(&account) {
        return Err(ConfigError::UnknownAccount(account));
    }

    let interval = section
        .interval
        .ok_or_else(|| ConfigError::MissingField(format!("interval (feed {})", url)))?;
    let interval_minutes = u32::try_from(interval).map_err(|_| {
        ConfigError::Invalid(format!("interval {} for feed {} is out of range", interval, url))
    })?;

    Ok(FeedConfig {
        feed_id: url,
        account,
        interval_minutes,
        message_format: section
            .format
            .clone()
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
        title_format: section.title_format.clone(),
    })
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SPIGOT_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("spigot").join("config.toml"))
}
