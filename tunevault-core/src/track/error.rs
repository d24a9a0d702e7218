use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("failed to open track database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on track database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("track store path not configured")]
    MissingStore,
    #[error("track record not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type TrackResult<T> = Result<T, TrackError>;
