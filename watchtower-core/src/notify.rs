//! Notification sinks: render a page of records into a digest and deliver it.
//!
//! A sink makes exactly one delivery attempt per call. Retrying is the
//! caller's business.

use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;
use watchtower_model::{StreamKind, StreamRecord};

use crate::error::{Result, WatchError};

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ERROR_BODY: usize = 512;

#[async_trait]
pub trait Notifier<R>: Send + Sync
where
    R: StreamRecord + 'static,
{
    async fn send(&self, batch: &[R]) -> Result<()>;
}

/// Header line followed by one `- <line>` per record.
pub fn render_digest<R: StreamRecord>(header: &str, records: &[R]) -> String {
    let mut text = String::with_capacity(header.len() + records.len() * 32);
    text.push_str(header);
    text.push('\n');
    for record in records {
        let _ = writeln!(text, "- {}", record.digest_line());
    }
    text
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    username: &'a str,
}

/// Incoming-webhook sink (Mattermost/Slack style JSON body).
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: Url,
    username: String,
    header: String,
}

impl WebhookNotifier {
    pub fn new(
        endpoint: Url,
        username: impl Into<String>,
        header: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            username: username.into(),
            header: header.into(),
        })
    }

    /// Sink using the stream's default label and header.
    pub fn for_stream(
        kind: StreamKind,
        endpoint: Url,
        timeout: Duration,
    ) -> Result<Self> {
        Self::new(
            endpoint,
            kind.default_username(),
            kind.default_header(),
            timeout,
        )
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// POST an already rendered digest.
    pub async fn deliver(&self, text: &str) -> Result<()> {
        let payload = WebhookPayload {
            text,
            username: &self.username,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(username = %self.username, status = status.as_u16(), "digest delivered");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(WatchError::Delivery {
            status: status.as_u16(),
            body,
        })
    }
}

impl fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The webhook URL is a credential; only show where it points.
        f.debug_struct("WebhookNotifier")
            .field("host", &self.endpoint.host_str())
            .field("username", &self.username)
            .field("header", &self.header)
            .finish()
    }
}

#[async_trait]
impl<R> Notifier<R> for WebhookNotifier
where
    R: StreamRecord + 'static,
{
    async fn send(&self, batch: &[R]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let text = render_digest(&self.header, batch);
        self.deliver(&text).await
    }
}

/// Writes digests to the log instead of delivering them.
#[derive(Clone, Debug)]
pub struct LogNotifier {
    username: String,
    header: String,
}

impl LogNotifier {
    pub fn new(username: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            header: header.into(),
        }
    }

    pub fn for_stream(kind: StreamKind) -> Self {
        Self::new(kind.default_username(), kind.default_header())
    }
}

#[async_trait]
impl<R> Notifier<R> for LogNotifier
where
    R: StreamRecord + 'static,
{
    async fn send(&self, batch: &[R]) -> Result<()> {
        let text = render_digest(&self.header, batch);
        info!(username = %self.username, records = batch.len(), digest = %text, "dry run: digest not sent");
        Ok(())
    }
}
