use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("resource {id} unavailable: {reason}")]
    Unavailable { id: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid metadata payload: {0}")]
    InvalidPayload(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        FetchError::Transport(error.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
