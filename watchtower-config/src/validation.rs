use std::time::Duration;

use thiserror::Error;

use crate::models::Config;

const SHORT_INTERVAL: Duration = Duration::from_secs(5);
const LARGE_PAGE_SIZE: usize = 5_000;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error(
        "no database configured; set DATABASE_URL or DB_HOST, DB_USER and DB_NAME"
    )]
    MissingDatabaseUrl,
    #[error("no webhook URL for stream {stream}; set MM_WEBHOOK or WEBHOOK_URL")]
    MissingWebhookUrl { stream: String },
    #[error("invalid webhook URL '{url}': {reason}")]
    InvalidWebhookUrl { url: String, reason: String },
    #[error("page size must be at least 1")]
    ZeroPageSize,
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
    #[error("no streams enabled")]
    NoStreamsEnabled,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

/// What a command needs from the configuration. Commands that only inspect
/// local state can run without a database or webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    pub database: bool,
    pub webhook: bool,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            database: true,
            webhook: true,
        }
    }
}

pub fn apply_guard_rails(
    config: &Config,
    requirements: Requirements,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if requirements.database && config.database.url.is_none() {
        return Err(ConfigGuardRailError::MissingDatabaseUrl);
    }

    if config.polling.page_size == 0 {
        return Err(ConfigGuardRailError::ZeroPageSize);
    }
    if config.polling.interval.is_zero() {
        return Err(ConfigGuardRailError::ZeroInterval);
    }

    let mut enabled = 0;
    for stream in config.enabled_streams() {
        enabled += 1;
        match stream.endpoint(&config.webhook) {
            Some(url) => {
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConfigGuardRailError::InvalidWebhookUrl {
                        url: url.to_string(),
                        reason: "scheme must be http or https".into(),
                    });
                }
                if url.scheme() == "http" {
                    warnings.push_with_hint(
                        format!(
                            "webhook for {} is plain http; digests travel unencrypted",
                            stream.kind
                        ),
                        "Use an https endpoint",
                    );
                }
            }
            None if requirements.webhook => {
                return Err(ConfigGuardRailError::MissingWebhookUrl {
                    stream: stream.kind.to_string(),
                });
            }
            None => {}
        }
    }
    if enabled == 0 {
        return Err(ConfigGuardRailError::NoStreamsEnabled);
    }

    if config.polling.interval < SHORT_INTERVAL {
        warnings.push_with_hint(
            format!(
                "poll interval {} is very short",
                humantime::format_duration(config.polling.interval)
            ),
            "Intervals under 5s put steady load on the database",
        );
    }

    if config.polling.page_size > LARGE_PAGE_SIZE {
        warnings.push_with_hint(
            format!(
                "page size {} is large; each digest lists every record in a page",
                config.polling.page_size
            ),
            "Chat webhooks may reject very long messages",
        );
    }

    if config.polling.notify_on_first_run {
        warnings.push(
            "NOTIFY_ON_FIRST_RUN is on; a cold start announces the whole backlog",
        );
    }

    Ok(warnings)
}
