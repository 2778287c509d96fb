//! Error types for Spigot

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpigotError>;

#[derive(Error, Debug)]
pub enum SpigotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SpigotError {
    /// Returns the appropriate exit code for this error
    ///
    /// Only configuration and persistence failures are expected to reach the
    /// top level; feed and publish failures are handled per feed.
    pub fn exit_code(&self) -> i32 {
        match self {
            SpigotError::Config(_) => 2,
            SpigotError::Database(_) => 3,
            SpigotError::Feed(_) => 1,
            SpigotError::Publish(_) => 1,
            SpigotError::InvalidInput(_) => 1,
        }
    }

    /// True for failures that abandon a single feed step but leave the run going
    pub fn is_transient(&self) -> bool {
        matches!(self, SpigotError::Feed(_) | SpigotError::Publish(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Failed to write config file {path}: {source}")]
    WriteError {
        path: String,
        source: std::io::Error,
    },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Item with link {0} is already stored")]
    DuplicateLink(String),

    #[error("No item with link {0}")]
    UnknownLink(String),

    #[error("Database {0} uses the pre-2.2 schema (no message column); upgrade it before running")]
    LegacySchema(String),
}

#[derive(Error, Debug, Clone)]
pub enum FeedError {
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("No publisher configured for account {0}")]
    UnknownAccount(String),
}
