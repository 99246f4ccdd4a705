//! Per-stream polling loop.
//!
//! A driver owns one stream's engine, store and watermark. It moves through
//! `Initializing -> Running -> (Stopped | Failed)`:
//!
//! - `Initializing` loads the persisted watermark, runs one cycle with the
//!   first-run notification flag and persists the result. Any failure here
//!   is fatal for the process.
//! - `Running` ticks every `interval` (plus backoff while failing). A failed
//!   cycle is logged and keeps the in-memory progress of the pages it already
//!   delivered, so the next tick resumes with the page that failed. The
//!   watermark is only persisted after a cycle succeeds.
//! - `Stopped` is reached on cancellation. Nothing is persisted on the way out.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use watchtower_model::Watermark;

use crate::backoff::BackoffPolicy;
use crate::engine::{ScanEngine, ScanFailure};
use crate::error::WatchError;
use crate::notify::Notifier;
use crate::source::OrderedSource;
use crate::store::WatermarkStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    Running,
    Stopped,
    Failed,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Initializing => "initializing",
            DriverState::Running => "running",
            DriverState::Stopped => "stopped",
            DriverState::Failed => "failed",
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriverSettings {
    pub interval: Duration,
    /// Deliver the backlog found by the very first cycle after a cold start.
    pub notify_on_first_run: bool,
    pub backoff: BackoffPolicy,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            notify_on_first_run: false,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Initialization failures. Each one stops the whole process.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{stream}: failed to load watermark: {source}")]
    Load {
        stream: String,
        #[source]
        source: WatchError,
    },

    #[error("{stream}: initial scan failed: {source}")]
    InitialScan {
        stream: String,
        #[source]
        source: ScanFailure,
    },

    #[error("{stream}: failed to persist initial watermark: {source}")]
    Save {
        stream: String,
        #[source]
        source: WatchError,
    },
}

impl DriverError {
    pub fn stream(&self) -> &str {
        match self {
            DriverError::Load { stream, .. }
            | DriverError::InitialScan { stream, .. }
            | DriverError::Save { stream, .. } => stream,
        }
    }
}

/// Summary of a driver that stopped on cancellation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverExit {
    pub stream: String,
    /// Cycles run, the initial one included.
    pub cycles: u64,
    pub failed_cycles: u64,
    /// In-memory watermark at exit; may be ahead of what was persisted.
    pub watermark: Watermark,
}

pub struct StreamDriver<S, N, W> {
    engine: ScanEngine<S, N>,
    store: W,
    settings: DriverSettings,
}

impl<S, N, W> fmt::Debug for StreamDriver<S, N, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDriver")
            .field("engine", &self.engine)
            .field("store", &std::any::type_name::<W>())
            .field("settings", &self.settings)
            .finish()
    }
}

impl<S, N, W> StreamDriver<S, N, W>
where
    S: OrderedSource,
    N: Notifier<S::Record>,
    W: WatermarkStore,
{
    pub fn new(
        engine: ScanEngine<S, N>,
        store: W,
        settings: DriverSettings,
    ) -> Self {
        Self {
            engine,
            store,
            settings,
        }
    }

    pub fn stream(&self) -> &str {
        self.engine.stream()
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub async fn run(
        self,
        cancel: CancellationToken,
    ) -> Result<DriverExit, DriverError> {
        let stream = self.stream().to_string();
        self.enter(DriverState::Initializing);

        let initialized = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.initialize() => Some(result),
        };

        let mut watermark = match initialized {
            None => {
                self.enter(DriverState::Stopped);
                return Ok(DriverExit {
                    stream,
                    cycles: 0,
                    failed_cycles: 0,
                    watermark: Watermark::zero(),
                });
            }
            Some(Err(err)) => {
                error!(stream = %stream, error = %err, "stream initialization failed");
                self.enter(DriverState::Failed);
                return Err(err);
            }
            Some(Ok(watermark)) => watermark,
        };

        self.enter(DriverState::Running);
        let mut persisted = watermark;
        let mut cycles: u64 = 1;
        let mut failed_cycles: u64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay = self.settings.interval
                + self.settings.backoff.delay_for(consecutive_failures);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = self.engine.scan_cycle(&mut watermark, true) => outcome,
            };
            cycles += 1;

            match outcome {
                Ok(report) => {
                    consecutive_failures = 0;
                    if report.records == 0 {
                        debug!(stream = %stream, "no new records");
                    }
                    // Also covers pages delivered by an earlier failed cycle.
                    if watermark == persisted {
                        continue;
                    }
                    match self.store.save(&stream, &watermark).await {
                        Ok(()) => persisted = watermark,
                        Err(err) => {
                            // Progress stays in memory; a restart redelivers it.
                            warn!(
                                stream = %stream,
                                watermark = %watermark,
                                error = %err,
                                "failed to persist watermark"
                            );
                        }
                    }
                }
                Err(failure) => {
                    failed_cycles += 1;
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    error!(
                        stream = %stream,
                        processed = failure.processed,
                        pages = failure.pages,
                        consecutive_failures,
                        retry_from = %watermark,
                        error = %failure.source,
                        "scan cycle failed"
                    );
                }
            }
        }

        self.enter(DriverState::Stopped);
        info!(
            stream = %stream,
            cycles,
            failed_cycles,
            watermark = %watermark,
            "stream stopped"
        );
        Ok(DriverExit {
            stream,
            cycles,
            failed_cycles,
            watermark,
        })
    }

    async fn initialize(&self) -> Result<Watermark, DriverError> {
        let stream = self.stream();
        let mut watermark =
            self.store
                .load(stream)
                .await
                .map_err(|source| DriverError::Load {
                    stream: stream.to_string(),
                    source,
                })?;
        info!(stream, watermark = %watermark, "watermark loaded");

        let report = self
            .engine
            .scan_cycle(&mut watermark, self.settings.notify_on_first_run)
            .await
            .map_err(|source| DriverError::InitialScan {
                stream: stream.to_string(),
                source,
            })?;

        self.store
            .save(stream, &watermark)
            .await
            .map_err(|source| DriverError::Save {
                stream: stream.to_string(),
                source,
            })?;

        info!(
            stream,
            records = report.records,
            notified = self.settings.notify_on_first_run,
            watermark = %watermark,
            "initial scan complete"
        );
        Ok(watermark)
    }

    fn enter(&self, state: DriverState) {
        info!(stream = self.stream(), state = %state, "driver state");
    }
}
