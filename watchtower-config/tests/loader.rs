use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use watchtower_config::{
    ConfigGuardRailError, ConfigLoadError, ConfigLoader, EnvConfig, Requirements,
};
use watchtower_model::StreamKind;

fn env(pairs: &[(&str, &str)]) -> EnvConfig {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvConfig::from_lookup(|key| map.get(key).cloned()).expect("valid env")
}

fn minimal() -> Vec<(&'static str, &'static str)> {
    vec![
        ("DATABASE_URL", "postgresql://watch:pw@localhost:5432/scans"),
        ("MM_WEBHOOK", "https://chat.example/hooks/abc"),
    ]
}

fn write_config(contents: &str) -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("watchtower.toml");
    fs::write(&path, contents).expect("write config");
    (dir, path)
}

#[test]
fn defaults_apply_with_minimal_environment() {
    let load = ConfigLoader::new().load_from_env(env(&minimal())).unwrap();
    let config = load.config;

    assert_eq!(config.polling.interval, Duration::from_secs(30));
    assert_eq!(config.polling.page_size, 500);
    assert!(!config.polling.notify_on_first_run);
    assert_eq!(config.state_dir, std::path::PathBuf::from("./state"));
    assert_eq!(config.enabled_streams().count(), 2);
    assert_eq!(
        config.stream(StreamKind::Links).unwrap().username,
        "LinkWatcher"
    );
    assert!(load.warnings.is_empty());
}

#[test]
fn database_url_is_composed_from_parts() {
    let load = ConfigLoader::new()
        .load_from_env(env(&[
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6432"),
            ("DB_USER", "watch"),
            ("DB_PASSWORD", "p@ss word"),
            ("DB_NAME", "scans"),
            ("DB_SSLMODE", "require"),
            ("MM_WEBHOOK", "https://chat.example/hooks/abc"),
        ]))
        .unwrap();

    let url = load.config.database.url.unwrap();
    assert!(url.starts_with("postgresql://watch:"));
    assert!(url.contains("@db.internal:6432/scans"));
    assert!(url.ends_with("?sslmode=require"));
    assert!(!url.contains("p@ss word"));
}

#[test]
fn redacted_url_hides_password() {
    let load = ConfigLoader::new().load_from_env(env(&minimal())).unwrap();
    let redacted = load.config.redacted_database_url().unwrap();
    assert!(!redacted.contains(":pw@"));
    assert!(redacted.contains("***"));
}

#[test]
fn file_values_apply_and_environment_wins() {
    let (_dir, path) = write_config(
        r#"
state_dir = "/var/lib/watchtower"

[database]
url = "postgresql://file@localhost/scans"

[webhook]
url = "https://chat.example/hooks/from-file"
timeout = "3s"

[polling]
interval = "45s"
page_size = 100

[polling.backoff]
base = "2s"
max = "1m"
jitter = 0.0

[streams.links]
username = "Links"
header = "**Fresh links**"
webhook_url = "https://chat.example/hooks/links"
"#,
    );

    let mut pairs = minimal();
    pairs.push(("POLL_INTERVAL", "10s"));
    let load = ConfigLoader::new()
        .with_config_path(&path)
        .load_from_env(env(&pairs))
        .unwrap();
    let config = load.config;

    assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));
    assert_eq!(
        config.database.url.as_deref(),
        Some("postgresql://watch:pw@localhost:5432/scans")
    );
    assert_eq!(
        config.webhook.url.as_ref().map(|url| url.as_str()),
        Some("https://chat.example/hooks/abc")
    );
    assert_eq!(config.webhook.timeout, Duration::from_secs(3));
    assert_eq!(config.polling.interval, Duration::from_secs(10));
    assert_eq!(config.polling.page_size, 100);
    assert_eq!(config.polling.backoff.base(), Duration::from_secs(2));
    assert_eq!(config.polling.backoff.max(), Duration::from_secs(60));
    assert_eq!(
        config.state_dir,
        std::path::PathBuf::from("/var/lib/watchtower")
    );

    let links = config.stream(StreamKind::Links).unwrap();
    assert_eq!(links.username, "Links");
    assert_eq!(links.header, "**Fresh links**");
    assert_eq!(
        links.endpoint(&config.webhook).unwrap().as_str(),
        "https://chat.example/hooks/links"
    );
    let domains = config.stream(StreamKind::Domains).unwrap();
    assert_eq!(domains.username, "DomainWatcher");
}

#[test]
fn stream_selection_from_environment() {
    let mut pairs = minimal();
    pairs.push(("WATCHTOWER_STREAMS", "links"));
    let config = ConfigLoader::new()
        .load_from_env(env(&pairs))
        .unwrap()
        .config;

    let enabled: Vec<_> = config.enabled_streams().map(|s| s.kind).collect();
    assert_eq!(enabled, vec![StreamKind::Links]);
}

#[test]
fn unknown_stream_is_rejected() {
    let mut pairs = minimal();
    pairs.push(("WATCHTOWER_STREAMS", "domains,emails"));
    let err = ConfigLoader::new().load_from_env(env(&pairs)).unwrap_err();
    assert!(matches!(err, ConfigLoadError::UnknownStream(_)));
}

#[test]
fn missing_database_is_a_guard_rail() {
    let err = ConfigLoader::new()
        .load_from_env(env(&[("MM_WEBHOOK", "https://chat.example/h")]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::MissingDatabaseUrl)
    ));
}

#[test]
fn missing_webhook_is_a_guard_rail() {
    let err = ConfigLoader::new()
        .load_from_env(env(&[("DATABASE_URL", "postgresql://localhost/scans")]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::MissingWebhookUrl { .. })
    ));
}

#[test]
fn relaxed_requirements_allow_local_commands() {
    let load = ConfigLoader::new()
        .with_requirements(Requirements {
            database: false,
            webhook: false,
        })
        .load_from_env(env(&[]))
        .unwrap();
    assert!(load.config.database.url.is_none());
    assert!(load.config.webhook.url.is_none());
}

#[test]
fn non_http_webhook_is_rejected() {
    let err = ConfigLoader::new()
        .load_from_env(env(&[
            ("DATABASE_URL", "postgresql://localhost/scans"),
            ("MM_WEBHOOK", "ftp://chat.example/hook"),
        ]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::InvalidWebhookUrl { .. })
    ));
}

#[test]
fn zero_page_size_and_interval_are_rejected() {
    let mut pairs = minimal();
    pairs.push(("PAGE_SIZE", "0"));
    let err = ConfigLoader::new().load_from_env(env(&pairs)).unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::ZeroPageSize)
    ));

    let mut pairs = minimal();
    pairs.push(("POLL_INTERVAL", "0s"));
    let err = ConfigLoader::new().load_from_env(env(&pairs)).unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::ZeroInterval)
    ));
}

#[test]
fn all_streams_disabled_is_rejected() {
    let (_dir, path) = write_config(
        r#"
[streams.domains]
enabled = false

[streams.links]
enabled = false
"#,
    );
    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_from_env(env(&minimal()))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::NoStreamsEnabled)
    ));
}

#[test]
fn risky_settings_produce_warnings() {
    let load = ConfigLoader::new()
        .load_from_env(env(&[
            ("DATABASE_URL", "postgresql://localhost/scans"),
            ("MM_WEBHOOK", "http://chat.example/hook"),
            ("POLL_INTERVAL", "1s"),
            ("PAGE_SIZE", "10000"),
            ("NOTIFY_ON_FIRST_RUN", "true"),
        ]))
        .unwrap();
    // Plain http is reported once per enabled stream.
    assert_eq!(load.warnings.len(), 5);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .with_config_path(dir.path().join("absent.toml"))
        .load_from_env(env(&minimal()))
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let (_dir, path) = write_config("[polling\ninterval = 3");
    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_from_env(env(&minimal()))
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn bad_file_duration_names_its_key() {
    let (_dir, path) = write_config("[polling]\ninterval = \"whenever\"\n");
    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_from_env(env(&minimal()))
        .unwrap_err();
    assert!(err.to_string().contains("polling.interval"));
}
