//! Error types for queuectl.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Rejected at the submission boundary, never reaches the store.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The store could not be reached or the statement failed.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Storage and IO faults that a worker should back off from and retry,
    /// as opposed to failures that say something about the job itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
