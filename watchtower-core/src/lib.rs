//! Watermark-driven change detection for append-mostly Postgres tables.
//!
//! Each logical stream (domains, social links) keeps a composite
//! `(created_at, id)` watermark. A [`driver::StreamDriver`] polls its
//! [`source::OrderedSource`] for records strictly after that watermark,
//! hands each page to a [`notify::Notifier`] and persists the watermark
//! through a [`store::WatermarkStore`] once a whole cycle succeeds.
//! Delivery is at-least-once: a failed cycle resumes with the page that was
//! not accepted, and a restart after a failed save repeats earlier digests.

pub mod backoff;
pub mod driver;
pub mod engine;
pub mod error;
pub mod notify;
pub mod source;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use backoff::BackoffPolicy;
pub use driver::{DriverError, DriverExit, DriverSettings, DriverState, StreamDriver};
pub use engine::{DEFAULT_PAGE_SIZE, ScanEngine, ScanFailure, ScanReport};
pub use error::{Result, WatchError};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use source::{OrderedSource, PoolSettings, PostgresSource, connect_pool};
pub use store::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore};
pub use supervisor::{StreamSupervisor, SupervisorError};

pub use watchtower_model as model;
