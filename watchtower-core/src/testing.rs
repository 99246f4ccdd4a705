//! In-memory fakes shared by the unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use watchtower_model::{Domain, StreamRecord, Watermark};

use crate::error::{Result, WatchError};
use crate::notify::Notifier;
use crate::source::OrderedSource;

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

pub(crate) fn domain(id: i64, secs: i64) -> Domain {
    Domain {
        id,
        landing_domain: format!("site-{id}.example"),
        created_at: at(secs),
    }
}

/// `count` domains with ids `1..=count`, one second apart.
pub(crate) fn domains(count: i64) -> Vec<Domain> {
    (1..=count).map(|id| domain(id, 1_000 + id)).collect()
}

/// Table stand-in that follows the ordered-source contract.
#[derive(Debug, Default)]
pub(crate) struct VecSource {
    records: Mutex<Vec<Domain>>,
    fetched_after: Mutex<Vec<Watermark>>,
    fail_fetches: AtomicBool,
    fail_fetch_calls: Mutex<HashSet<usize>>,
}

impl VecSource {
    pub(crate) fn with(records: Vec<Domain>) -> Self {
        let source = Self::default();
        source.insert(records);
        source
    }

    pub(crate) fn insert(&self, records: Vec<Domain>) {
        self.records.lock().unwrap().extend(records);
    }

    pub(crate) fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Fail the `n`th fetch (1-based, counted across the source's life).
    pub(crate) fn fail_fetch(&self, n: usize) {
        self.fail_fetch_calls.lock().unwrap().insert(n);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetched_after.lock().unwrap().len()
    }

    /// Watermark passed to each fetch, in call order.
    pub(crate) fn fetched_after(&self) -> Vec<Watermark> {
        self.fetched_after.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderedSource for VecSource {
    type Record = Domain;

    async fn fetch_page(
        &self,
        after: &Watermark,
        limit: usize,
    ) -> Result<Vec<Domain>> {
        let call = {
            let mut fetched = self.fetched_after.lock().unwrap();
            fetched.push(*after);
            fetched.len()
        };
        if self.fail_fetches.load(Ordering::SeqCst)
            || self.fail_fetch_calls.lock().unwrap().contains(&call)
        {
            return Err(WatchError::DataAccess("connection refused".into()));
        }

        let mut page: Vec<Domain> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| after.admits_record(*record))
            .cloned()
            .collect();
        page.sort_by_key(|record| record.position());
        page.truncate(limit);
        Ok(page)
    }
}

/// Records every delivered batch; can be told to fail specific calls.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    delivered: Mutex<Vec<Vec<i64>>>,
    attempts: AtomicUsize,
    fail_calls: Mutex<HashSet<usize>>,
}

impl RecordingNotifier {
    /// Fail the `n`th attempt (1-based, counted across the notifier's life).
    pub(crate) fn fail_call(&self, n: usize) {
        self.fail_calls.lock().unwrap().insert(n);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Ids of each successfully delivered batch.
    pub(crate) fn delivered(&self) -> Vec<Vec<i64>> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl<R> Notifier<R> for RecordingNotifier
where
    R: StreamRecord + 'static,
{
    async fn send(&self, batch: &[R]) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_calls.lock().unwrap().contains(&attempt) {
            return Err(WatchError::Delivery {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        self.delivered
            .lock()
            .unwrap()
            .push(batch.iter().map(StreamRecord::id).collect());
        Ok(())
    }
}
