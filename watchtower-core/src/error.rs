use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("data access failed: {0}")]
    DataAccess(String),

    #[error("notification endpoint returned {status}: {body}")]
    Delivery { status: u16, body: String },

    #[error("notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to persist watermark at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl WatchError {
    /// Sink unreachable or rejecting the digest.
    pub fn is_delivery(&self) -> bool {
        matches!(self, WatchError::Delivery { .. } | WatchError::Transport(_))
    }

    pub fn is_data_access(&self) -> bool {
        matches!(self, WatchError::DataAccess(_))
    }

    pub(crate) fn persistence(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        WatchError::Persistence {
            path: path.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for WatchError {
    fn from(err: sqlx::Error) -> Self {
        WatchError::DataAccess(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
