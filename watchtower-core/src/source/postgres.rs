use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool};
use tracing::{info, trace};
use watchtower_model::{Domain, SocialLink, StreamRecord, Watermark};

use super::OrderedSource;
use crate::error::{Result, WatchError};

/// Table mapping for a record type read by [`PostgresSource`].
pub trait SourceTable:
    for<'r> FromRow<'r, PgRow> + StreamRecord + Send + Unpin + 'static
{
    const TABLE: &'static str;
    /// Columns selected, in `FromRow` field names.
    const COLUMNS: &'static str;
}

impl SourceTable for Domain {
    const TABLE: &'static str = "domains";
    const COLUMNS: &'static str = "id, landing_domain, created_at";
}

impl SourceTable for SocialLink {
    const TABLE: &'static str = "social_links";
    const COLUMNS: &'static str = "id, url, domain, created_at";
}

/// Keyset-paginated reader over one append-mostly table.
pub struct PostgresSource<R> {
    pool: PgPool,
    page_sql: String,
    count_sql: String,
    _record: PhantomData<fn() -> R>,
}

impl<R: SourceTable> PostgresSource<R> {
    pub fn new(pool: PgPool) -> Self {
        let page_sql = format!(
            r#"
            SELECT {columns}
            FROM {table}
            WHERE created_at > $1
               OR (created_at = $1 AND id > $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
            columns = R::COLUMNS,
            table = R::TABLE,
        );
        let count_sql = format!(
            r#"
            SELECT COUNT(*)::bigint
            FROM {table}
            WHERE created_at > $1
               OR (created_at = $1 AND id > $2)
            "#,
            table = R::TABLE,
        );

        Self {
            pool,
            page_sql,
            count_sql,
            _record: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        R::TABLE
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of records not yet covered by `after`.
    pub async fn count_after(&self, after: &Watermark) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(&self.count_sql)
            .bind(after.last_created_at)
            .bind(after.last_id)
            .fetch_one(self.pool())
            .await
            .map_err(|err| {
                WatchError::DataAccess(format!(
                    "failed to count pending {} rows: {err}",
                    R::TABLE
                ))
            })
    }

    /// Whether the backing table is visible on the current search path.
    pub async fn table_exists(&self) -> Result<bool> {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(R::TABLE)
            .fetch_one(self.pool())
            .await
            .map_err(|err| {
                WatchError::DataAccess(format!(
                    "failed to look up table {}: {err}",
                    R::TABLE
                ))
            })
    }
}

impl<R> fmt::Debug for PostgresSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSource")
            .field("record", &std::any::type_name::<R>())
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

#[async_trait]
impl<R: SourceTable> OrderedSource for PostgresSource<R> {
    type Record = R;

    async fn fetch_page(
        &self,
        after: &Watermark,
        limit: usize,
    ) -> Result<Vec<R>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, R>(&self.page_sql)
            .bind(after.last_created_at)
            .bind(after.last_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(|err| {
                WatchError::DataAccess(format!(
                    "failed to fetch {} page: {err}",
                    R::TABLE
                ))
            })?;

        trace!(table = R::TABLE, after = %after, rows = rows.len(), "fetched page");
        Ok(rows)
    }
}

/// Connection settings for the shared pool. Every stream queries through
/// the same pool concurrently.
#[derive(Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSettings")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

pub async fn connect_pool(settings: &PoolSettings) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&settings.url).map_err(|err| {
        WatchError::DataAccess(format!("invalid database URL: {err}"))
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections.max(1))
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect_with(options)
        .await
        .map_err(|err| {
            WatchError::DataAccess(format!("database connection failed: {err}"))
        })?;

    info!(
        max_connections = settings.max_connections,
        "database pool initialized"
    );
    Ok(pool)
}
