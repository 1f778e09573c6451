//! Crate-wide error type.
//!
//! One variant per error kind this crate raises: configuration problems,
//! metadata mismatches, append-label violations, the target lock, I/O,
//! user-callable misbehaviour. Rollback replay failures are logged, never
//! raised (they must not mask the error that triggered the rollback).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ZappendError>;

#[derive(Error, Debug)]
pub enum ZappendError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("append-label error: {0}")]
    AppendLabel(String),

    #[error("{0}")]
    Lock(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("user-supplied slice source error: {0}")]
    UserCallable(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ZappendError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ZappendError::Configuration(msg.into())
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        ZappendError::Metadata(msg.into())
    }

    pub fn append_label(msg: impl Into<String>) -> Self {
        ZappendError::AppendLabel(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        ZappendError::Lock(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ZappendError::NotFound(msg.into())
    }

    pub fn user_callable(msg: impl Into<String>) -> Self {
        ZappendError::UserCallable(msg.into())
    }

    /// True for error kinds that are raised before any write and therefore
    /// never require rollback replay.
    pub fn is_pre_write(&self) -> bool {
        matches!(
            self,
            ZappendError::Configuration(_)
                | ZappendError::Metadata(_)
                | ZappendError::AppendLabel(_)
                | ZappendError::Lock(_)
        )
    }
}
