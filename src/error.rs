//! Error types for flowq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid job options: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("lease mismatch for job {job}: presented token is not the current holder")]
    LeaseMismatch { job: String },

    #[error("parent job not found: {0}")]
    ParentNotFound(String),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::model::JobState,
        to: crate::model::JobState,
    },

    #[error("handler error: {0}")]
    Handler(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
