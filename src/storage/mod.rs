use crate::{encode::EncodeError, metric::Point};
use thiserror::Error;

pub mod influx;

#[cfg(test)]
pub mod fake;

/// Destination for points. Implementations are expected to be
/// synchronous: a returned `Ok` means the batch was accepted.
pub trait Storage {
    /// Lightweight reachability check performed before every write batch.
    fn ready(&self) -> Result<(), StorageError>;
    fn write(&self, points: &[Point]) -> Result<(), StorageError>;
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage endpoint unreachable")]
    Unreachable(#[source] reqwest::Error),
    #[error("request to storage failed")]
    Request(#[source] reqwest::Error),
    #[error("storage not ready (status {0})")]
    NotReady(u16),
    #[error("storage rejected write (status {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("error encoding points")]
    Encode(#[from] EncodeError),
    #[error("error building storage client")]
    Client(#[source] reqwest::Error),
    #[error("invalid storage url {0:?}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        match e.is_connect() {
            true => StorageError::Unreachable(e),
            false => StorageError::Request(e),
        }
    }
}
