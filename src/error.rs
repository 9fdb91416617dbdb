use std::panic::Location;

use tracing::{error, warn};

/// Error surface of the engine. Every public operation resolves to one of
/// these kinds; the policy per kind (retry, fall-through, log-and-continue)
/// lives with the callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable label of the error kind, usable as a log field or a wire
    /// response discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::PermissionDenied(_) => "permission_denied",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::Conflict(_) => "conflict",
            EngineError::StorageUnavailable(_) => "storage_unavailable",
            EngineError::CryptoFailure(_) => "crypto_failure",
            EngineError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound("row not found".into()),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::StorageUnavailable(err.to_string())
    }
}

/// Records a failure the engine deliberately degrades through instead of
/// surfacing: object-store write-back, blob reclamation, default-grant
/// seeding. Most of these are expected operational noise and log at warn;
/// crypto and invariant failures keep error severity so an integrity
/// problem stays visible even on a swallowed path.
#[inline]
#[track_caller]
pub(crate) fn log_degraded(action: &str, err: &EngineError) {
    let location = Location::caller();
    let span_trace = tracing_error::SpanTrace::capture();

    match err {
        EngineError::CryptoFailure(_) | EngineError::Internal(_) => error!(
            target: "file_engine",
            %location,
            kind = err.kind(),
            error = %err,
            "{action} failed, continuing\nspan trace:\n{span_trace}"
        ),
        _ => warn!(
            target: "file_engine",
            %location,
            kind = err.kind(),
            error = %err,
            "{action} failed, continuing\nspan trace:\n{span_trace}"
        ),
    }
}
