use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;
use watchtower_core::BackoffPolicy;
use watchtower_core::notify::DEFAULT_WEBHOOK_TIMEOUT;
use watchtower_model::StreamKind;

use crate::models::{
    Config, ConfigMetadata, DEFAULT_MAX_CONNECTIONS, DEFAULT_PAGE_SIZE,
    DEFAULT_POLL_INTERVAL, DEFAULT_STATE_DIR, DatabaseConfig, PollingConfig,
    StreamConfig, WebhookConfig,
};
use crate::sources::{EnvConfig, FileConfig, FileDatabaseConfig};
use crate::util::parse_duration;
use crate::validation::{
    self, ConfigGuardRailError, ConfigWarnings, Requirements,
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["watchtower.toml", "config/watchtower.toml"];

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
    requirements: Requirements,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Load `.env`, read the process environment and resolve.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        self.load_with(|_| {})
    }

    /// Like [`load`](Self::load), but lets the caller override gathered
    /// values (command-line flags) before they are resolved.
    pub fn load_with<F>(&self, overrides: F) -> Result<ConfigLoad, ConfigLoadError>
    where
        F: FnOnce(&mut EnvConfig),
    {
        let env_file_loaded = match &self.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };
        debug!(env_file_loaded, "environment file processed");

        let mut env = EnvConfig::gather()?;
        overrides(&mut env);
        let mut load = self.load_from_env(env)?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Resolve against an already gathered environment. Does not touch
    /// the process environment.
    pub fn load_from_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file, config_path) = self.load_file_config(&env)?;
        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            debug!("no watchtower.toml found; using environment and defaults");
        }

        let config = compose(file.unwrap_or_default(), env, config_path)?;
        warnings.extend(validation::apply_guard_rails(
            &config,
            self.requirements,
        )?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self.config_path.clone().or(env.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file = read_file_config(&path)?;
        debug!(path = %path.display(), "configuration file loaded");
        Ok((Some(file), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents = std::fs::read_to_string(path).map_err(|source| {
        ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn compose(
    file: FileConfig,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        database: file_database,
        webhook: file_webhook,
        polling: file_polling,
        state_dir: file_state_dir,
        streams: file_streams,
    } = file;

    let database = DatabaseConfig {
        url: resolve_database_url(&env, &file_database)?,
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS),
    };

    let webhook = WebhookConfig {
        url: env
            .webhook_url
            .clone()
            .or(file_webhook.url)
            .map(|raw| parse_webhook_url(&raw))
            .transpose()?,
        timeout: match env.webhook_timeout {
            Some(timeout) => timeout,
            None => file_duration("webhook.timeout", file_webhook.timeout)?
                .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT),
        },
    };

    let defaults = BackoffPolicy::default();
    let backoff_base = match env.backoff_base {
        Some(base) => base,
        None => file_duration("polling.backoff.base", file_polling.backoff.base)?
            .unwrap_or(defaults.base()),
    };
    let backoff_max = match env.backoff_max {
        Some(max) => max,
        None => file_duration("polling.backoff.max", file_polling.backoff.max)?
            .unwrap_or(defaults.max()),
    };
    let jitter = file_polling
        .backoff
        .jitter
        .unwrap_or(defaults.jitter_ratio)
        .clamp(0.0, 1.0);

    let polling = PollingConfig {
        interval: match env.poll_interval {
            Some(interval) => interval,
            None => file_duration("polling.interval", file_polling.interval)?
                .unwrap_or(DEFAULT_POLL_INTERVAL),
        },
        page_size: env
            .page_size
            .or(file_polling.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE),
        notify_on_first_run: env
            .notify_on_first_run
            .or(file_polling.notify_on_first_run)
            .unwrap_or(false),
        backoff: BackoffPolicy::new(
            backoff_base,
            backoff_max.max(backoff_base),
            jitter,
        ),
    };

    for name in file_streams.keys() {
        name.parse::<StreamKind>()
            .map_err(|err| ConfigLoadError::UnknownStream(err.to_string()))?;
    }
    let env_streams = env
        .streams
        .as_ref()
        .map(|names| {
            names
                .iter()
                .map(|name| {
                    name.parse::<StreamKind>().map_err(|err| {
                        ConfigLoadError::UnknownStream(err.to_string())
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let mut streams = Vec::with_capacity(StreamKind::ALL.len());
    for kind in StreamKind::ALL {
        let mut stream = StreamConfig::defaults(kind);
        let overrides = file_streams
            .iter()
            .find(|(name, _)| name.parse::<StreamKind>().ok() == Some(kind))
            .map(|(_, overrides)| overrides.clone())
            .unwrap_or_default();

        if let Some(enabled) = overrides.enabled {
            stream.enabled = enabled;
        }
        if let Some(selected) = &env_streams {
            stream.enabled = selected.contains(&kind);
        }
        if let Some(username) = overrides.username {
            stream.username = username;
        }
        if let Some(header) = overrides.header {
            stream.header = header;
        }
        stream.webhook_url = overrides
            .webhook_url
            .map(|raw| parse_webhook_url(&raw))
            .transpose()?;
        streams.push(stream);
    }

    Ok(Config {
        database,
        webhook,
        polling,
        state_dir: env
            .state_dir
            .clone()
            .or(file_state_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
        streams,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    })
}

fn file_duration(
    key: &str,
    raw: Option<String>,
) -> Result<Option<Duration>, ConfigLoadError> {
    raw.map(|raw| parse_duration(key, &raw)).transpose()
}

fn parse_webhook_url(raw: &str) -> Result<Url, ConfigLoadError> {
    Url::parse(raw.trim()).map_err(|err| {
        ConfigGuardRailError::InvalidWebhookUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        }
        .into()
    })
}

/// `DATABASE_URL` wins; otherwise the `DB_*` parts are composed into a
/// `postgresql://` URL, then the file's `database.url` is used.
fn resolve_database_url(
    env: &EnvConfig,
    file_database: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(url) = env.database_url.clone() {
        return Ok(Some(url));
    }

    if let (Some(host), Some(user), Some(name)) = (
        env.database_host.as_ref(),
        env.database_user.as_ref(),
        env.database_name.as_ref(),
    ) {
        let port = env.database_port.unwrap_or(5432);
        let mut url = Url::parse(&format!("postgresql://{host}:{port}/{name}"))
            .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
        url.set_username(user).map_err(|_| {
            ConfigLoadError::InvalidDatabaseUsername {
                username: user.clone(),
            }
        })?;
        if let Some(password) = env.database_password.as_deref() {
            url.set_password(Some(password))
                .map_err(|_| ConfigLoadError::InvalidDatabasePassword)?;
        }
        if let Some(mode) = env.database_sslmode.as_deref() {
            url.query_pairs_mut().append_pair("sslmode", mode);
        }
        return Ok(Some(url.to_string()));
    }

    match file_database.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            Url::parse(url).map_err(|source| {
                ConfigLoadError::InvalidDatabaseUrl { source }
            })?;
            Ok(Some(url.to_string()))
        }
        _ => Ok(None),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("invalid database username '{username}'")]
    InvalidDatabaseUsername { username: String },
    #[error("failed to encode database password into URL")]
    InvalidDatabasePassword,
    #[error("{0}")]
    UnknownStream(String),
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
