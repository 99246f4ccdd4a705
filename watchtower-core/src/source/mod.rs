//! Ordered record sources.
//!
//! A source hands back the next bounded page of records strictly after a
//! watermark, sorted ascending by `(created_at, id)`. It never touches the
//! watermark itself; the engine decides when to move it.

use async_trait::async_trait;
use watchtower_model::{StreamRecord, Watermark};

use crate::error::Result;

pub mod postgres;

pub use postgres::{PoolSettings, PostgresSource, SourceTable, connect_pool};

#[cfg_attr(test, mockall::automock(type Record = watchtower_model::Domain;))]
#[async_trait]
pub trait OrderedSource: Send + Sync {
    type Record: StreamRecord + 'static;

    /// Records with `(created_at, id)` strictly greater than `after`,
    /// ascending, at most `limit` of them.
    async fn fetch_page(
        &self,
        after: &Watermark,
        limit: usize,
    ) -> Result<Vec<Self::Record>>;
}
