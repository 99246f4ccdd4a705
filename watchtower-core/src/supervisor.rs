//! Runs every stream driver on its own task and ties their lifetimes together.
//!
//! Streams never talk to each other. The only coupling is the shared
//! cancellation token and a channel of fatal initialization errors: the first
//! error received cancels the token, which stops every other stream. A stream
//! task that panics at any point cancels the token the same way.

use std::fmt;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::driver::{DriverError, DriverExit, StreamDriver};
use crate::notify::Notifier;
use crate::source::OrderedSource;
use crate::store::WatermarkStore;

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("stream {stream} failed: {source}")]
    StreamFailed {
        stream: String,
        #[source]
        source: DriverError,
    },

    #[error("stream task {stream} panicked")]
    Panicked { stream: String },
}

pub struct StreamSupervisor {
    cancel: CancellationToken,
    fatal_tx: mpsc::UnboundedSender<DriverError>,
    fatal_rx: mpsc::UnboundedReceiver<DriverError>,
    tasks: Vec<(String, JoinHandle<Option<DriverExit>>)>,
    grace: Duration,
}

impl fmt::Debug for StreamSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let streams: Vec<&str> =
            self.tasks.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("StreamSupervisor")
            .field("streams", &streams)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("grace", &self.grace)
            .finish()
    }
}

impl StreamSupervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            cancel,
            fatal_tx,
            fatal_rx,
            tasks: Vec::new(),
            grace: SHUTDOWN_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<S, N, W>(&mut self, driver: StreamDriver<S, N, W>)
    where
        S: OrderedSource + 'static,
        N: Notifier<S::Record> + 'static,
        W: WatermarkStore + 'static,
    {
        let stream = driver.stream().to_string();
        let cancel = self.cancel.clone();
        let fatal_tx = self.fatal_tx.clone();

        let handle = tokio::spawn(async move {
            match driver.run(cancel).await {
                Ok(exit) => Some(exit),
                Err(err) => {
                    // The receiver only goes away once `wait` has finished.
                    let _ = fatal_tx.send(err);
                    None
                }
            }
        });
        info!(stream = %stream, "stream started");
        self.tasks.push((stream, handle));
    }

    /// Block until the token is cancelled, a stream fails to initialize, a
    /// stream task panics, or every stream has exited. Then join all tasks
    /// within the grace period.
    pub async fn wait(self) -> Result<Vec<DriverExit>, SupervisorError> {
        let Self {
            cancel,
            fatal_tx,
            mut fatal_rx,
            tasks,
            grace,
        } = self;
        // Only the drivers hold senders now, so `recv` yields `None` once
        // every one of them has exited.
        drop(fatal_tx);

        let aborts: Vec<(String, AbortHandle)> = tasks
            .iter()
            .map(|(stream, handle)| (stream.clone(), handle.abort_handle()))
            .collect();
        let mut running: FuturesUnordered<_> = tasks
            .into_iter()
            .map(|(stream, handle)| async move { (stream, handle.await) })
            .collect();

        let mut failures = Vec::new();
        let mut exits = Vec::new();
        let mut panicked = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested; stopping streams");
                    break;
                }
                Some(err) = fatal_rx.recv() => {
                    error!(stream = err.stream(), error = %err, "stream failed; stopping all streams");
                    failures.push(err);
                    break;
                }
                joined = running.next() => match joined {
                    Some((stream, result)) => {
                        if !record_join(stream, result, &mut exits, &mut panicked) {
                            warn!("stream task panicked; stopping all streams");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        cancel.cancel();

        let drain = async {
            while let Some((stream, result)) = running.next().await {
                record_join(stream, result, &mut exits, &mut panicked);
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(grace = ?grace, "streams did not stop in time; aborting");
            for (stream, abort) in aborts {
                if !abort.is_finished() {
                    warn!(stream = %stream, "aborting stream task");
                    abort.abort();
                }
            }
        }

        while let Ok(err) = fatal_rx.try_recv() {
            error!(stream = err.stream(), error = %err, "stream failed");
            failures.push(err);
        }

        if let Some(source) = failures.into_iter().next() {
            return Err(SupervisorError::StreamFailed {
                stream: source.stream().to_string(),
                source,
            });
        }
        if let Some(stream) = panicked {
            return Err(SupervisorError::Panicked { stream });
        }
        Ok(exits)
    }
}

/// Fold one finished task into the results. Returns `false` if it panicked.
fn record_join(
    stream: String,
    result: Result<Option<DriverExit>, JoinError>,
    exits: &mut Vec<DriverExit>,
    panicked: &mut Option<String>,
) -> bool {
    match result {
        Ok(Some(exit)) => {
            exits.push(exit);
            true
        }
        // Initialization failure; its error arrives on the fatal channel.
        Ok(None) => true,
        Err(err) => {
            error!(stream = %stream, error = %err, "stream task panicked");
            panicked.get_or_insert(stream);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backoff::BackoffPolicy;
    use crate::driver::DriverSettings;
    use crate::engine::ScanEngine;
    use crate::store::MemoryWatermarkStore;
    use crate::testing::{RecordingNotifier, VecSource, domains};
    use watchtower_model::Domain;

    #[derive(Debug)]
    struct ExplodingNotifier;

    #[async_trait::async_trait]
    impl Notifier<Domain> for ExplodingNotifier {
        async fn send(&self, _batch: &[Domain]) -> crate::error::Result<()> {
            panic!("sink exploded");
        }
    }

    fn settings() -> DriverSettings {
        DriverSettings {
            interval: Duration::from_secs(30),
            notify_on_first_run: false,
            backoff: BackoffPolicy::none(),
        }
    }

    fn driver(
        stream: &str,
        source: Arc<VecSource>,
        store: Arc<MemoryWatermarkStore>,
    ) -> StreamDriver<VecSource, RecordingNotifier, Arc<MemoryWatermarkStore>> {
        let engine = ScanEngine::new(
            stream,
            source,
            Arc::new(RecordingNotifier::default()),
            10,
        );
        StreamDriver::new(engine, store, settings())
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_every_stream() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let cancel = CancellationToken::new();
        let mut supervisor = StreamSupervisor::new(cancel.clone());
        supervisor.spawn(driver(
            "domains",
            Arc::new(VecSource::with(domains(2))),
            store.clone(),
        ));
        supervisor.spawn(driver(
            "links",
            Arc::new(VecSource::with(domains(3))),
            store.clone(),
        ));
        assert_eq!(supervisor.len(), 2);

        let waiter = tokio::spawn(supervisor.wait());
        tokio::time::sleep(Duration::from_secs(65)).await;
        cancel.cancel();

        let mut exits = waiter.await.unwrap().unwrap();
        exits.sort_by(|a, b| a.stream.cmp(&b.stream));
        assert_eq!(exits.len(), 2);
        assert_eq!(exits[0].stream, "domains");
        assert_eq!(exits[0].cycles, 3);
        assert_eq!(exits[1].stream, "links");
        assert!(store.get("domains").await.is_some());
        assert!(store.get("links").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_start_stops_the_others() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let broken = Arc::new(VecSource::with(domains(1)));
        broken.set_fail_fetches(true);
        let healthy = Arc::new(VecSource::with(domains(1)));

        let cancel = CancellationToken::new();
        let mut supervisor = StreamSupervisor::new(cancel.clone());
        supervisor.spawn(driver("domains", healthy.clone(), store.clone()));
        supervisor.spawn(driver("links", broken, store.clone()));

        let err = supervisor.wait().await.unwrap_err();
        match err {
            SupervisorError::StreamFailed { stream, source } => {
                assert_eq!(stream, "links");
                assert!(matches!(source, DriverError::InitialScan { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cancel.is_cancelled());
        assert_eq!(store.get("links").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn panic_while_running_stops_the_others() {
        let store = Arc::new(MemoryWatermarkStore::new());
        let cancel = CancellationToken::new();
        let mut supervisor = StreamSupervisor::new(cancel.clone());
        supervisor.spawn(driver(
            "domains",
            Arc::new(VecSource::with(domains(2))),
            store.clone(),
        ));

        let links = Arc::new(VecSource::default());
        let engine =
            ScanEngine::new("links", links.clone(), Arc::new(ExplodingNotifier), 10);
        supervisor.spawn(StreamDriver::new(engine, store.clone(), settings()));

        let waiter = tokio::spawn(supervisor.wait());
        tokio::time::sleep(Duration::from_secs(1)).await;
        // Silent cold start is done; the next tick delivers and panics.
        links.insert(domains(1));

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Panicked { ref stream } if stream == "links"
        ));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_supervisor_returns_immediately() {
        let supervisor = StreamSupervisor::new(CancellationToken::new());
        assert!(supervisor.is_empty());
        assert!(supervisor.wait().await.unwrap().is_empty());
    }
}
