use std::path::PathBuf;
use std::time::Duration;

use url::Url;
use watchtower_core::{BackoffPolicy, DriverSettings, PoolSettings};
use watchtower_model::StreamKind;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PAGE_SIZE: usize = watchtower_core::DEFAULT_PAGE_SIZE;
pub const DEFAULT_STATE_DIR: &str = "./state";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub webhook: WebhookConfig,
    pub polling: PollingConfig,
    pub state_dir: PathBuf,
    /// One entry per known stream, enabled or not.
    pub streams: Vec<StreamConfig>,
    pub metadata: ConfigMetadata,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_deref().map(redact_url))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared endpoint; individual streams may override it.
    pub url: Option<Url>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    pub page_size: usize,
    pub notify_on_first_run: bool,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub kind: StreamKind,
    pub enabled: bool,
    pub username: String,
    pub header: String,
    pub webhook_url: Option<Url>,
}

impl StreamConfig {
    pub fn defaults(kind: StreamKind) -> Self {
        Self {
            kind,
            enabled: true,
            username: kind.default_username().to_string(),
            header: kind.default_header().to_string(),
            webhook_url: None,
        }
    }

    /// The stream's own endpoint, else the shared one.
    pub fn endpoint<'a>(&'a self, shared: &'a WebhookConfig) -> Option<&'a Url> {
        self.webhook_url.as_ref().or(shared.url.as_ref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Config {
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamConfig> {
        self.streams.iter().find(|stream| stream.kind == kind)
    }

    pub fn enabled_streams(&self) -> impl Iterator<Item = &StreamConfig> {
        self.streams.iter().filter(|stream| stream.enabled)
    }

    /// Database URL with the password masked, safe to log.
    pub fn redacted_database_url(&self) -> Option<String> {
        self.database.url.as_deref().map(redact_url)
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            interval: self.polling.interval,
            notify_on_first_run: self.polling.notify_on_first_run,
            backoff: self.polling.backoff,
        }
    }

    pub fn pool_settings(&self) -> Option<PoolSettings> {
        self.database.url.as_ref().map(|url| PoolSettings {
            max_connections: self.database.max_connections,
            ..PoolSettings::new(url.clone())
        })
    }
}

fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}
