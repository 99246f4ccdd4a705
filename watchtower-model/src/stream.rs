use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// The logical streams the agent knows how to watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StreamKind {
    Domains,
    Links,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Domains, StreamKind::Links];

    /// Stable name, used for state files and log fields.
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Domains => "domains",
            StreamKind::Links => "links",
        }
    }

    /// Display label the notification is posted under.
    pub fn default_username(self) -> &'static str {
        match self {
            StreamKind::Domains => "DomainWatcher",
            StreamKind::Links => "LinkWatcher",
        }
    }

    pub fn default_header(self) -> &'static str {
        match self {
            StreamKind::Domains => "**Появились новые домены:**",
            StreamKind::Links => "**Появились новые ссылки:**",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamKind {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "domains" | "domain" => Ok(StreamKind::Domains),
            "links" | "link" | "social_links" => Ok(StreamKind::Links),
            other => Err(ModelError::UnknownStream(other.to_string())),
        }
    }
}
