//! Mastodon publisher
//!
//! Posts through the megalodon client, so any instance speaking the Mastodon
//! API works (Mastodon, Pleroma, Akkoma, GoToSocial).

use async_trait::async_trait;
use megalodon::{Megalodon, SNS};
use std::collections::BTreeMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::AccountConfig;
use crate::error::{PublishError, Result};
use crate::publishers::Publisher;
use crate::types::RecentPost;

/// Default status length on Mastodon instances
const DEFAULT_CHARACTER_LIMIT: usize = 500;

/// Client for a single account
pub struct MastodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
    character_limit: usize,
    /// Resolved on first use from the access token
    account_id: OnceCell<String>,
}

impl MastodonClient {
    pub fn new(instance_url: String, access_token: String) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token),
            Some(concat!("spigot/", env!("CARGO_PKG_VERSION")).to_string()),
        )
        .map_err(|e| {
            PublishError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        Ok(Self {
            client,
            instance_url,
            character_limit: DEFAULT_CHARACTER_LIMIT,
            account_id: OnceCell::new(),
        })
    }

    /// Create a client from an `[accounts.<name>]` table, reading the token file
    pub fn from_config(config: &AccountConfig) -> Result<Self> {
        let token_path = shellexpand::full(&config.token_file).map_err(|e| {
            PublishError::Authentication(format!("Failed to expand token file path: {}", e))
        })?;

        let token = std::fs::read_to_string(token_path.as_ref())
            .map_err(|e| {
                PublishError::Authentication(format!("Failed to read Mastodon token file: {}", e))
            })?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(
                PublishError::Authentication("Mastodon token file is empty".to_string()).into(),
            );
        }

        Self::new(normalize_instance_url(&config.instance), token)
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// Query the instance for its status length limit
    pub async fn fetch_instance_info(&mut self) -> Result<()> {
        let response = self
            .client
            .get_instance()
            .await
            .map_err(|e| map_megalodon_error(e, "fetch instance info"))?;

        self.character_limit = response.json.configuration.statuses.max_characters as usize;
        Ok(())
    }

    pub fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PublishError::Validation("Content cannot be empty".to_string()).into());
        }

        let char_count = content.chars().count();
        if char_count > self.character_limit {
            return Err(PublishError::Validation(format!(
                "Content exceeds the instance's {} character limit (current: {} characters)",
                self.character_limit, char_count
            ))
            .into());
        }

        Ok(())
    }

    pub async fn post(&self, message: &str) -> Result<String> {
        self.validate_content(message)?;

        let response = self
            .client
            .post_status(message.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let post_id = match response.json {
            megalodon::megalodon::PostStatusOutput::Status(status) => status.id,
            megalodon::megalodon::PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };
        Ok(post_id)
    }

    async fn account_id(&self) -> Result<&str> {
        let id = self
            .account_id
            .get_or_try_init(|| async {
                self.client
                    .verify_account_credentials()
                    .await
                    .map(|response| response.json.id)
                    .map_err(|e| map_megalodon_error(e, "verify credentials"))
            })
            .await?;
        Ok(id.as_str())
    }

    pub async fn recent_posts(&self) -> Result<Vec<RecentPost>> {
        let account_id = self.account_id().await?.to_string();

        let response = self
            .client
            .get_account_statuses(account_id, None)
            .await
            .map_err(|e| map_megalodon_error(e, "list statuses"))?;

        Ok(response
            .json
            .into_iter()
            .map(|status| RecentPost {
                text: html_to_text(&status.content),
                timestamp: status.created_at.timestamp(),
            })
            .collect())
    }
}

/// Mastodon clients keyed by account name
pub struct MastodonPublisher {
    clients: BTreeMap<String, MastodonClient>,
}

impl MastodonPublisher {
    pub fn new(clients: BTreeMap<String, MastodonClient>) -> Self {
        Self { clients }
    }

    /// Build one client per configured account
    ///
    /// Accounts whose token cannot be read are reported as errors; the
    /// caller decides whether that is fatal.
    pub fn from_accounts(
        accounts: &BTreeMap<String, AccountConfig>,
    ) -> (Self, Vec<(String, crate::SpigotError)>) {
        let mut clients = BTreeMap::new();
        let mut failures = Vec::new();

        for (name, config) in accounts {
            match MastodonClient::from_config(config) {
                Ok(client) => {
                    debug!(account = %name, instance = %client.instance_url(), "Configured account");
                    clients.insert(name.clone(), client);
                }
                Err(e) => failures.push((name.clone(), e)),
            }
        }

        (Self { clients }, failures)
    }

    /// Fetch each instance's status length limit, keeping the default on failure
    pub async fn refresh_limits(&mut self) {
        for (name, client) in self.clients.iter_mut() {
            if let Err(e) = client.fetch_instance_info().await {
                warn!(account = %name, "Could not fetch instance info: {}", e);
            }
        }
    }

    fn client(&self, account: &str) -> Result<&MastodonClient> {
        self.clients
            .get(account)
            .ok_or_else(|| PublishError::UnknownAccount(account.to_string()).into())
    }
}

#[async_trait]
impl Publisher for MastodonPublisher {
    async fn publish(&self, account: &str, message: &str, _title: Option<&str>) -> Result<String> {
        // Statuses have no subject line; the title is not sent
        self.client(account)?.post(message).await
    }

    async fn recent_posts(&self, account: &str) -> Result<Vec<RecentPost>> {
        self.client(account)?.recent_posts().await
    }

    fn name(&self) -> &str {
        "mastodon"
    }
}

fn normalize_instance_url(instance: &str) -> String {
    if instance.starts_with("http://") || instance.starts_with("https://") {
        instance.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", instance.trim_end_matches('/'))
    }
}

/// Reduce status HTML to the plain text it was posted from
pub fn html_to_text(html: &str) -> String {
    nanohtml2text::html2text(html)
        .replace("\r\n", "\n")
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

/// Map megalodon errors onto publish errors by HTTP status where available
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PublishError {
    classify_error(&error.to_string(), context)
}

fn classify_error(error_str: &str, context: &str) -> PublishError {
    let error_lower = error_str.to_lowercase();

    match extract_http_status(error_str) {
        Some(401) | Some(403) => PublishError::Authentication(format!(
            "Mastodon rejected the access token ({}): {}",
            context, error_str
        )),
        Some(422) => PublishError::Validation(format!(
            "Mastodon rejected the status ({}): {}",
            context, error_str
        )),
        Some(429) => PublishError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(_) => PublishError::Network(format!("Mastodon HTTP error ({}): {}", context, error_str)),
        None if error_lower.contains("unauthorized") || error_lower.contains("forbidden") => {
            PublishError::Authentication(format!(
                "Mastodon authentication failed ({}): {}",
                context, error_str
            ))
        }
        None if error_lower.contains("parse") || error_lower.contains("json") => {
            PublishError::Posting(format!(
                "Unexpected response from Mastodon ({}): {}",
                context, error_str
            ))
        }
        None => PublishError::Network(format!("Mastodon error ({}): {}", context, error_str)),
    }
}

/// Find an HTTP status code in an error message ("HTTP 401", "status 403", "429:")
fn extract_http_status(error_str: &str) -> Option<u16> {
    for prefix in ["HTTP ", "status ", "code: ", "status_code: "] {
        if let Some(pos) = error_str.find(prefix) {
            let code = error_str[pos + prefix.len()..]
                .get(0..3)
                .and_then(|s| s.parse::<u16>().ok());
            if let Some(code) = code.filter(|c| (100..=599).contains(c)) {
                return Some(code);
            }
        }
    }

    let bytes = error_str.as_bytes();
    bytes.windows(4).enumerate().find_map(|(i, window)| {
        let standalone = i == 0 || !bytes[i - 1].is_ascii_digit();
        let is_code = window[..3].iter().all(u8::is_ascii_digit)
            && (window[3] == b':' || window[3] == b' ');
        if !(standalone && is_code) {
            return None;
        }
        std::str::from_utf8(&window[..3])
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .filter(|c| (100..=599).contains(c))
    })
}
