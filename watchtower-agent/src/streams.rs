//! Wiring from resolved configuration to running stream drivers.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use watchtower_config::{Config, StreamConfig, WebhookConfig};
use watchtower_core::source::SourceTable;
use watchtower_core::{
    FileWatermarkStore, LogNotifier, MemoryWatermarkStore, Notifier,
    PostgresSource, ScanEngine, StreamDriver, StreamSupervisor, WatchError,
    WatermarkStore, WebhookNotifier,
};
use watchtower_model::{Domain, SocialLink, StreamKind, StreamRecord};

/// Where a stream's digests go: the configured webhook, or the log during a
/// dry run.
#[derive(Debug)]
pub enum DigestSink {
    Webhook(WebhookNotifier),
    Log(LogNotifier),
}

impl DigestSink {
    pub fn for_stream(
        stream: &StreamConfig,
        webhook: &WebhookConfig,
        dry_run: bool,
    ) -> anyhow::Result<Self> {
        if dry_run {
            return Ok(Self::Log(LogNotifier::new(
                &stream.username,
                &stream.header,
            )));
        }

        let endpoint = stream.endpoint(webhook).cloned().with_context(|| {
            format!("no webhook URL configured for {}", stream.kind)
        })?;
        let notifier = WebhookNotifier::new(
            endpoint,
            &stream.username,
            &stream.header,
            webhook.timeout,
        )
        .with_context(|| format!("failed to build webhook client for {}", stream.kind))?;
        Ok(Self::Webhook(notifier))
    }
}

#[async_trait]
impl<R> Notifier<R> for DigestSink
where
    R: StreamRecord + 'static,
{
    async fn send(&self, batch: &[R]) -> Result<(), WatchError> {
        match self {
            Self::Webhook(notifier) => {
                Notifier::<R>::send(notifier, batch).await
            }
            Self::Log(notifier) => Notifier::<R>::send(notifier, batch).await,
        }
    }
}

/// Start one driver per enabled stream. Returns how many were started.
pub fn spawn_streams(
    supervisor: &mut StreamSupervisor,
    config: &Config,
    pool: &PgPool,
    store: Arc<dyn WatermarkStore>,
    dry_run: bool,
) -> anyhow::Result<usize> {
    let mut started = 0;
    for stream in config.enabled_streams() {
        match stream.kind {
            StreamKind::Domains => spawn_stream::<Domain>(
                supervisor,
                config,
                stream,
                pool,
                store.clone(),
                dry_run,
            )?,
            StreamKind::Links => spawn_stream::<SocialLink>(
                supervisor,
                config,
                stream,
                pool,
                store.clone(),
                dry_run,
            )?,
        }
        started += 1;
    }
    Ok(started)
}

fn spawn_stream<R: SourceTable>(
    supervisor: &mut StreamSupervisor,
    config: &Config,
    stream: &StreamConfig,
    pool: &PgPool,
    store: Arc<dyn WatermarkStore>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let source = Arc::new(PostgresSource::<R>::new(pool.clone()));
    let sink = Arc::new(DigestSink::for_stream(stream, &config.webhook, dry_run)?);
    let engine = ScanEngine::new(
        stream.kind.name(),
        source,
        sink,
        config.polling.page_size,
    );
    info!(
        stream = %stream.kind,
        table = R::TABLE,
        username = %stream.username,
        "stream configured"
    );
    supervisor.spawn(StreamDriver::new(engine, store, config.driver_settings()));
    Ok(())
}

/// In-memory store seeded from the persisted watermarks, so a dry run starts
/// where the real agent left off without writing anything back.
pub async fn dry_run_store(config: &Config) -> anyhow::Result<MemoryWatermarkStore> {
    let files = FileWatermarkStore::new(&config.state_dir);
    let memory = MemoryWatermarkStore::new();
    for stream in config.enabled_streams() {
        let name = stream.kind.name();
        let watermark = files
            .load(name)
            .await
            .with_context(|| format!("failed to read saved watermark for {name}"))?;
        memory.save(name, &watermark).await?;
    }
    Ok(memory)
}
