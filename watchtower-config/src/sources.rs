use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::loader::ConfigLoadError;
use crate::util::{parse_csv, parse_duration, parse_flag, parse_number};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub webhook: FileWebhookConfig,
    #[serde(default)]
    pub polling: FilePollingConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Keyed by stream name (`domains`, `links`).
    #[serde(default)]
    pub streams: BTreeMap<String, FileStreamConfig>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileWebhookConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Humantime string, e.g. `"10s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilePollingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_on_first_run: Option<bool>,
    #[serde(default)]
    pub backoff: FileBackoffConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileBackoffConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileStreamConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub database_host: Option<String>,
    pub database_port: Option<u16>,
    pub database_user: Option<String>,
    pub database_password: Option<String>,
    pub database_name: Option<String>,
    pub database_sslmode: Option<String>,
    pub database_max_connections: Option<u32>,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    pub page_size: Option<usize>,
    pub notify_on_first_run: Option<bool>,
    pub state_dir: Option<PathBuf>,
    pub streams: Option<Vec<String>>,
    pub backoff_base: Option<Duration>,
    pub backoff_max: Option<Duration>,
}

impl EnvConfig {
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key).filter(|value| !value.trim().is_empty())
        };
        let duration = |key: &str| {
            get(key).map(|raw| parse_duration(key, &raw)).transpose()
        };

        Ok(Self {
            config_path: get("WATCHTOWER_CONFIG").map(PathBuf::from),
            database_url: get("DATABASE_URL"),
            database_host: get("DB_HOST"),
            database_port: get("DB_PORT")
                .map(|raw| parse_number("DB_PORT", &raw))
                .transpose()?,
            database_user: get("DB_USER"),
            database_password: get("DB_PASSWORD"),
            database_name: get("DB_NAME"),
            database_sslmode: get("DB_SSLMODE"),
            database_max_connections: get("DB_MAX_CONNECTIONS")
                .map(|raw| parse_number("DB_MAX_CONNECTIONS", &raw))
                .transpose()?,
            webhook_url: get("MM_WEBHOOK").or_else(|| get("WEBHOOK_URL")),
            webhook_timeout: duration("WEBHOOK_TIMEOUT")?,
            poll_interval: duration("POLL_INTERVAL")?,
            page_size: get("PAGE_SIZE")
                .map(|raw| parse_number("PAGE_SIZE", &raw))
                .transpose()?,
            notify_on_first_run: get("NOTIFY_ON_FIRST_RUN")
                .map(|raw| parse_flag("NOTIFY_ON_FIRST_RUN", &raw))
                .transpose()?,
            state_dir: get("STATE_DIR").map(PathBuf::from),
            streams: get("WATCHTOWER_STREAMS").map(|raw| parse_csv(&raw)),
            backoff_base: duration("BACKOFF_BASE")?,
            backoff_max: duration("BACKOFF_MAX")?,
        })
    }
}
