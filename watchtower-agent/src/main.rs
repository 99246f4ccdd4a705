//! `watchtower`: polls the `domains` and `social_links` tables and posts a
//! digest of every new batch to a chat webhook.

mod commands;
mod shutdown;
mod streams;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use watchtower_config::{Config, ConfigLoad, ConfigLoader, Requirements};
use watchtower_core::{
    FileWatermarkStore, StreamSupervisor, WatermarkStore, connect_pool,
};
use watchtower_model::StreamKind;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "watchtower", version)]
#[command(about = "Announce newly discovered domains and social links to a chat webhook")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    args: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct GlobalArgs {
    /// Path to a watchtower.toml configuration file
    #[arg(long, env = "WATCHTOWER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Environment file to load instead of ./.env
    #[arg(long, env = "WATCHTOWER_ENV_FILE", global = true)]
    env_file: Option<PathBuf>,

    /// Directory holding one watermark file per stream (overrides config)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Time between polls, e.g. 30s or 2m (overrides config)
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Maximum records fetched and announced per page (overrides config)
    #[arg(long)]
    page_size: Option<usize>,

    /// Announce the backlog found on a cold start instead of skipping it
    #[arg(long, default_value_t = false)]
    notify_on_first_run: bool,

    /// Log digests instead of posting them and never write watermarks
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll every enabled stream until interrupted (default)
    Run,
    #[command(subcommand)]
    Db(DbCommand),
    #[command(subcommand)]
    State(StateCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Verify the source tables and report pending rows per stream, then exit
    Preflight,
}

#[derive(Debug, Subcommand)]
enum StateCommand {
    /// Print persisted watermarks as JSON
    Show,
    /// Forget a stream's progress so the next start rescans its table
    Reset {
        /// Stream name: domains or links
        stream: StreamKind,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cli.args).await,
        Command::Db(DbCommand::Preflight) => {
            let config = load_config(
                &cli.args,
                Requirements {
                    database: true,
                    webhook: false,
                },
            )?;
            commands::db_preflight(&config).await
        }
        Command::State(command) => {
            let config = load_config(
                &cli.args,
                Requirements {
                    database: false,
                    webhook: false,
                },
            )?;
            match command {
                StateCommand::Show => commands::state_show(&config).await,
                StateCommand::Reset { stream } => {
                    commands::state_reset(&config, stream).await
                }
            }
        }
    }
}

async fn run(args: GlobalArgs) -> anyhow::Result<()> {
    let config = load_config(
        &args,
        Requirements {
            database: true,
            webhook: !args.dry_run,
        },
    )?;
    let settings = config
        .pool_settings()
        .context("no database configured")?;

    info!(
        database = %config.redacted_database_url().unwrap_or_default(),
        state_dir = %config.state_dir.display(),
        interval = %humantime::format_duration(config.polling.interval),
        page_size = config.polling.page_size,
        notify_on_first_run = config.polling.notify_on_first_run,
        dry_run = args.dry_run,
        "starting watchtower"
    );

    let pool = connect_pool(&settings)
        .await
        .context("failed to connect to PostgreSQL")?;

    let store: Arc<dyn WatermarkStore> = if args.dry_run {
        Arc::new(streams::dry_run_store(&config).await?)
    } else {
        Arc::new(FileWatermarkStore::new(&config.state_dir))
    };

    let cancel = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(cancel.clone());
    let mut supervisor = StreamSupervisor::new(cancel.clone());

    if let Err(err) =
        streams::spawn_streams(&mut supervisor, &config, &pool, store, args.dry_run)
    {
        cancel.cancel();
        let _ = supervisor.wait().await;
        pool.close().await;
        return Err(err);
    }

    let outcome = supervisor.wait().await;
    cancel.cancel();
    let _ = signals.await;
    pool.close().await;

    let exits = outcome.context("watchtower stopped after a stream failure")?;
    for exit in &exits {
        info!(
            stream = %exit.stream,
            cycles = exit.cycles,
            failed_cycles = exit.failed_cycles,
            watermark = %exit.watermark,
            "stream summary"
        );
    }
    info!("watchtower stopped");
    Ok(())
}

fn load_config(
    args: &GlobalArgs,
    requirements: Requirements,
) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new().with_requirements(requirements);
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }

    let ConfigLoad { config, warnings } = loader
        .load_with(|env| {
            if let Some(dir) = &args.state_dir {
                env.state_dir = Some(dir.clone());
            }
            if let Some(interval) = args.interval {
                env.poll_interval = Some(interval);
            }
            if let Some(page_size) = args.page_size {
                env.page_size = Some(page_size);
            }
            if args.notify_on_first_run {
                env.notify_on_first_run = Some(true);
            }
        })
        .context("failed to load configuration")?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    Ok(config)
}
