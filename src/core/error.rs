//! Error types for the task runtime.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by runtime components.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Queue is stopped or mid-drain and rejected new work.
    #[error("queue closed: {0}")]
    QueueClosed(String),
    /// A scheduler registration used a zero interval.
    #[error("invalid poll interval: {0:?}")]
    InvalidInterval(Duration),
    /// File acquisition or I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// SQLite acquisition or statement failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
///
/// Job and task bodies return this so failures carry context through the
/// queues' isolation layer into the logs.
pub type AppResult<T> = Result<T, anyhow::Error>;
