//! Scan-and-notify engine.
//!
//! One cycle pages through everything strictly after the watermark. Each
//! page is delivered first and only then is the watermark moved to the
//! page's last record, so a failed delivery never skips records.
//!
//! Pagination ends on the first empty page or on a page shorter than the
//! page size. A full page is always followed by another fetch, so
//! `k * page_size` new records take `k + 1` fetches.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use watchtower_model::{StreamRecord, Watermark};

use crate::error::WatchError;
use crate::notify::Notifier;
use crate::source::OrderedSource;

pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Counters for one successful cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub records: usize,
    pub pages: usize,
    pub fetches: usize,
    pub deliveries: usize,
}

/// A cycle that stopped early. Pages counted here were fully processed and
/// the caller's watermark already reflects them.
#[derive(Debug, Error)]
#[error(
    "scan of {stream} failed after {processed} records in {pages} pages: {source}"
)]
pub struct ScanFailure {
    pub stream: String,
    pub processed: usize,
    pub pages: usize,
    #[source]
    pub source: WatchError,
}

pub struct ScanEngine<S, N> {
    stream: String,
    source: Arc<S>,
    notifier: Arc<N>,
    page_size: usize,
}

impl<S, N> std::fmt::Debug for ScanEngine<S, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEngine")
            .field("stream", &self.stream)
            .field("source", &std::any::type_name::<S>())
            .field("notifier", &std::any::type_name::<N>())
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl<S, N> ScanEngine<S, N>
where
    S: OrderedSource,
    N: Notifier<S::Record>,
{
    pub fn new(
        stream: impl Into<String>,
        source: Arc<S>,
        notifier: Arc<N>,
        page_size: usize,
    ) -> Self {
        Self {
            stream: stream.into(),
            source,
            notifier,
            page_size: page_size.max(1),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Run one cycle from `watermark`, advancing it page by page.
    ///
    /// With `notify` off, pages are only scanned. On failure the watermark
    /// stays at the end of the last fully processed page.
    pub async fn scan_cycle(
        &self,
        watermark: &mut Watermark,
        notify: bool,
    ) -> Result<ScanReport, ScanFailure> {
        let mut report = ScanReport::default();

        loop {
            let page = self
                .source
                .fetch_page(watermark, self.page_size)
                .await
                .map_err(|err| self.failure(&report, err))?;
            report.fetches += 1;

            if page.is_empty() {
                break;
            }

            let next = self
                .page_end(watermark, &page)
                .map_err(|err| self.failure(&report, err))?;

            if notify {
                self.notifier
                    .send(&page)
                    .await
                    .map_err(|err| self.failure(&report, err))?;
                report.deliveries += 1;
            }

            *watermark = next;
            report.records += page.len();
            report.pages += 1;
            debug!(
                stream = %self.stream,
                page = report.pages,
                size = page.len(),
                watermark = %watermark,
                "page processed"
            );

            if page.len() < self.page_size {
                break;
            }
        }

        if report.records > 0 {
            info!(
                stream = %self.stream,
                new_records = report.records,
                pages = report.pages,
                notified = notify,
                "processed"
            );
        }
        Ok(report)
    }

    /// Position of the page's last record, after checking the page honours
    /// the source contract. Accepting anything else could move the
    /// watermark backwards or past unseen records.
    fn page_end(
        &self,
        watermark: &Watermark,
        page: &[S::Record],
    ) -> Result<Watermark, WatchError> {
        if page.len() > self.page_size {
            return Err(WatchError::InvalidState(format!(
                "source returned {} records for a page of {}",
                page.len(),
                self.page_size
            )));
        }

        let mut previous = *watermark;
        for record in page {
            if !previous.admits_record(record) {
                return Err(WatchError::InvalidState(format!(
                    "record {} at {} is not after {previous}",
                    record.id(),
                    record.created_at().to_rfc3339(),
                )));
            }
            previous = record.position();
        }
        Ok(previous)
    }

    fn failure(&self, report: &ScanReport, source: WatchError) -> ScanFailure {
        ScanFailure {
            stream: self.stream.clone(),
            processed: report.records,
            pages: report.pages,
            source,
        }
    }
}
