// Error taxonomy for ingestion and the snapshot store

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The registry snapshot could not be downloaded (network error or non-success status).
    #[error("failed to retrieve {url}: {source}")]
    ResourceRetrieval {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A CSV record (or the header line) is missing an expected field.
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    /// A row for this (identifier, snapshot date) pair is already stored.
    #[error("snapshot for {identifier} on {snapshot_date} already exists")]
    ConstraintViolation {
        identifier: String,
        snapshot_date: NaiveDate,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A panic while holding the store connection poisoned its lock.
    #[error("snapshot store connection is poisoned")]
    StorePoisoned,
}

impl Error {
    /// True for failures that abort an ingestion run before any record was read.
    pub fn is_retrieval(&self) -> bool {
        matches!(self, Error::ResourceRetrieval { .. } | Error::Io { .. })
    }
}
