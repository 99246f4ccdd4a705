use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown stream '{0}' (expected one of: domains, links)")]
    UnknownStream(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
