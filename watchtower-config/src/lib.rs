//! Configuration for the watchtower agent.
//!
//! Values come from the process environment (after an optional `.env` file),
//! then an optional TOML file, then built-in defaults. The loader resolves
//! them into a [`Config`], applies guard rails and collects non-fatal
//! [`ConfigWarnings`].

pub mod loader;
pub mod models;
pub mod sources;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, PollingConfig, StreamConfig,
    WebhookConfig,
};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{
    ConfigGuardRailError, ConfigWarning, ConfigWarnings, Requirements,
};
