//! One-shot maintenance commands: database preflight and watermark state.

use std::collections::BTreeMap;

use anyhow::{Context, bail};
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use watchtower_config::Config;
use watchtower_core::source::SourceTable;
use watchtower_core::{FileWatermarkStore, PostgresSource, WatermarkStore, connect_pool};
use watchtower_model::{Domain, SocialLink, StreamKind, Watermark};

pub async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let settings = config
        .pool_settings()
        .context("no database configured")?;
    info!(
        database = %config.redacted_database_url().unwrap_or_default(),
        max_connections = settings.max_connections,
        "connecting to PostgreSQL"
    );
    connect_pool(&settings)
        .await
        .context("failed to connect to PostgreSQL")
}

/// Check every enabled stream's table and report how many rows are waiting
/// past its saved watermark.
pub async fn db_preflight(config: &Config) -> anyhow::Result<()> {
    let pool = connect(config).await?;
    let store = FileWatermarkStore::new(&config.state_dir);

    let mut result = Ok(());
    for stream in config.enabled_streams() {
        let checked = match stream.kind {
            StreamKind::Domains => check_stream::<Domain>(&pool, &store, stream.kind).await,
            StreamKind::Links => check_stream::<SocialLink>(&pool, &store, stream.kind).await,
        };
        match checked {
            Ok((watermark, pending)) => info!(
                stream = %stream.kind,
                watermark = %watermark,
                pending,
                "stream ready"
            ),
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }

    pool.close().await;
    result?;
    info!("database preflight passed");
    Ok(())
}

async fn check_stream<R: SourceTable>(
    pool: &PgPool,
    store: &FileWatermarkStore,
    kind: StreamKind,
) -> anyhow::Result<(Watermark, i64)> {
    let source = PostgresSource::<R>::new(pool.clone());
    if !source.table_exists().await? {
        bail!("table {} for stream {kind} does not exist", source.table());
    }
    let watermark = store
        .load(kind.name())
        .await
        .with_context(|| format!("failed to read saved watermark for {kind}"))?;
    let pending = source.count_after(&watermark).await?;
    Ok((watermark, pending))
}

/// Persisted watermark for every known stream, as printed by `state show`.
pub async fn saved_state(
    store: &FileWatermarkStore,
) -> anyhow::Result<serde_json::Value> {
    let mut streams = BTreeMap::new();
    for kind in StreamKind::ALL {
        let name = kind.name();
        let saved = store.path_for(name)?.exists();
        let watermark = store.load(name).await?;
        streams.insert(
            name,
            json!({
                "saved": saved,
                "last_created_at": watermark.last_created_at.to_rfc3339(),
                "last_id": watermark.last_id,
            }),
        );
    }
    Ok(json!({
        "state_dir": store.dir().display().to_string(),
        "streams": streams,
    }))
}

pub async fn state_show(config: &Config) -> anyhow::Result<()> {
    let store = FileWatermarkStore::new(&config.state_dir);
    let state = saved_state(&store).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

pub async fn state_reset(config: &Config, kind: StreamKind) -> anyhow::Result<()> {
    let store = FileWatermarkStore::new(&config.state_dir);
    if store.reset(kind.name()).await? {
        println!("reset {kind}; the next start scans its table from the beginning");
    } else {
        println!("no saved state for {kind}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(id: i64) -> Watermark {
        Watermark {
            last_id: id,
            ..Watermark::zero()
        }
    }

    #[tokio::test]
    async fn state_lists_every_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileWatermarkStore::new(dir.path());
        store.save("links", &mark(42)).await.unwrap();

        let state = saved_state(&store).await.unwrap();
        assert_eq!(state["streams"]["links"]["saved"], true);
        assert_eq!(state["streams"]["links"]["last_id"], 42);
        assert_eq!(state["streams"]["domains"]["saved"], false);
        assert_eq!(state["streams"]["domains"]["last_id"], 0);
    }
}
