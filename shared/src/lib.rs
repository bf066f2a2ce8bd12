// shared/src/lib.rs

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("TTL must be 0 or >= 1 second (expiry has second resolution), got {0:?}")]
    InvalidTtl(Duration),
    #[error("invalid gc policy: {0}")]
    InvalidGcPolicy(String),
    #[error("counter values are 8 bytes wide, found {0} bytes")]
    InvalidCounter(usize),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Failures surfaced by the storage engine. The underlying error is kept
/// as-is so callers can inspect engine-specific diagnostics.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("storage: {0}")]
    Storage(#[from] sled::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupted data: {0}")]
    Corrupted(String),
    #[error("a compaction pass is already running")]
    CompactionInProgress,
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Engine(EngineError::Storage(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Engine(EngineError::Io(err))
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
pub mod ttl;
