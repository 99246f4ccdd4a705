//! Keyset pagination against a live PostgreSQL.
//!
//! Run with `DATABASE_URL=... cargo test -p watchtower-core --features postgres-tests`.
#![cfg(feature = "postgres-tests")]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use sqlx::PgPool;
use watchtower_core::engine::ScanEngine;
use watchtower_core::model::{Domain, SocialLink, StreamKind, StreamRecord, Watermark};
use watchtower_core::notify::LogNotifier;
use watchtower_core::source::{OrderedSource, PostgresSource};

fn ids<R: StreamRecord>(page: &[R]) -> Vec<i64> {
    page.iter().map(StreamRecord::id).collect()
}

#[sqlx::test(migrations = false, fixtures("schema", "records"))]
async fn pages_follow_created_at_then_id(pool: PgPool) {
    let source = PostgresSource::<Domain>::new(pool);

    let first = source.fetch_page(&Watermark::zero(), 2).await.unwrap();
    assert_eq!(ids(&first), vec![1, 2]);

    let after = first[1].position();
    let second = source.fetch_page(&after, 2).await.unwrap();
    assert_eq!(ids(&second), vec![3, 4]);

    let third = source.fetch_page(&second[1].position(), 2).await.unwrap();
    assert_eq!(ids(&third), vec![5]);
    assert!(
        source
            .fetch_page(&third[0].position(), 2)
            .await
            .unwrap()
            .is_empty()
    );
}

#[sqlx::test(migrations = false, fixtures("schema", "records"))]
async fn same_timestamp_is_split_by_id(pool: PgPool) {
    let source = PostgresSource::<Domain>::new(pool);
    let shared = Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap();

    let page = source.fetch_page(&Watermark::new(shared, 2), 10).await.unwrap();
    assert_eq!(ids(&page), vec![3, 4, 5]);
}

#[sqlx::test(migrations = false, fixtures("schema", "records"))]
async fn social_links_keep_optional_domain(pool: PgPool) {
    let source = PostgresSource::<SocialLink>::new(pool);

    let page = source.fetch_page(&Watermark::zero(), 10).await.unwrap();
    assert_eq!(ids(&page), vec![10, 11, 12]);
    assert_eq!(page[0].domain.as_deref(), Some("alpha.example"));
    assert_eq!(page[1].domain, None);
}

#[sqlx::test(migrations = false, fixtures("schema", "records"))]
async fn backlog_and_table_checks(pool: PgPool) {
    let source = PostgresSource::<Domain>::new(pool.clone());
    assert!(source.table_exists().await.unwrap());
    assert_eq!(source.count_after(&Watermark::zero()).await.unwrap(), 5);

    let mid = Watermark::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap(), 3);
    assert_eq!(source.count_after(&mid).await.unwrap(), 2);

    sqlx::query("DROP TABLE social_links")
        .execute(&pool)
        .await
        .unwrap();
    let links = PostgresSource::<SocialLink>::new(pool);
    assert!(!links.table_exists().await.unwrap());
}

#[sqlx::test(migrations = false, fixtures("schema", "records"))]
async fn full_cycle_over_table(pool: PgPool) {
    let source = Arc::new(PostgresSource::<Domain>::new(pool));
    let notifier = Arc::new(LogNotifier::for_stream(StreamKind::Domains));
    let engine = ScanEngine::new("domains", source, notifier, 2);

    let mut watermark = Watermark::zero();
    let report = engine.scan_cycle(&mut watermark, true).await.unwrap();
    assert_eq!(report.records, 5);
    assert_eq!(report.fetches, 3);
    assert_eq!(watermark.last_id, 5);

    let again = engine.scan_cycle(&mut watermark, true).await.unwrap();
    assert_eq!(again.records, 0);
}
