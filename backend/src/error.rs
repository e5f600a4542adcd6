//! Top-level (infrastructure) error type.
//!
//! Infrastructure errors (§7) are anything the storage layer returns that
//! isn't one of the eight simulated business errors in [`crate::error_sim`].
//! They are process-fatal: the caller logs them at `error!` and the process
//! exits non-zero (§6).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("session creation failed: {0}")]
    SessionCreation(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
