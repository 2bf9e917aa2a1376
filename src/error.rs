//! Error types for the task queue and job layer.
//!
//! `anyhow` is used at the process boundary (main, HTTP handlers); these
//! typed errors exist where callers need to distinguish failure kinds, per
//! the error-handling design in the specification (validation vs.
//! persistence vs. decode vs. job runtime).

use thiserror::Error;

/// Raised by `Job::check_valid` or by the HTTP layer before a task is admitted.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        ValidationError(msg.into())
    }
}

/// I/O or encoding failure while writing the persistence file.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("write queue file: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode queue: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure while loading the persistence file at startup. Fatal: the process
/// must not start with an incoherent queue.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("read queue file: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode queue: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown job type {0:?}")]
    UnknownJobType(String),
}
