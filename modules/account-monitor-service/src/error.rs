//! Error taxonomy for the store, the platform client and the RPC layer.

use axum::http::StatusCode;
use thiserror::Error;

/// Raised once at client construction when no usable credential exists.
#[derive(Debug, Clone, Error)]
#[error("Configuration error: {0}")]
pub struct ConfigurationError(pub String);

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Unauthorized(String),

    #[error("Rate limited (reset at {reset_at:?})")]
    RateLimited { reset_at: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Platform client is disconnected")]
    Disconnected,
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Parse(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Errors tied to one account's rows rather than to the storage engine.
    ///
    /// A constraint violation here usually means the account was deleted
    /// while a poll was in flight.
    pub fn is_account_scoped(&self) -> bool {
        match self {
            StoreError::NotFound(_) | StoreError::Validation(_) => true,
            StoreError::Storage(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            StoreError::Storage(_) => false,
        }
    }
}

/// Failures surfaced to RPC callers
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Account #{0} was saved but monitoring could not be enabled")]
    MonitoringNotEnabled(i64),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Store(StoreError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_)
            | AppError::Store(StoreError::NotFound(_))
            | AppError::Client(ClientError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::Storage(_)) | AppError::MonitoringNotEnabled(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Client(ClientError::Unauthorized(_)) => StatusCode::FORBIDDEN,
            AppError::Client(ClientError::Disconnected)
            | AppError::Client(ClientError::RateLimited { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Client(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> StoreError {
        StoreError::Storage(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_constraint_violation_is_account_scoped() {
        let err = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT);
        assert!(err.is_account_scoped());
    }

    #[test]
    fn test_engine_failures_escalate() {
        assert!(!sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_account_scoped());
        assert!(!sqlite_failure(rusqlite::ffi::SQLITE_IOERR).is_account_scoped());
        assert!(!StoreError::Storage(rusqlite::Error::InvalidQuery).is_account_scoped());
    }

    #[test]
    fn test_not_found_is_account_scoped() {
        assert!(StoreError::NotFound("account #7".to_string()).is_account_scoped());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::from(StoreError::Validation("too many ids".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("account #1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(ClientError::Disconnected).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(ClientError::Network("reset".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::from(sqlite_failure(rusqlite::ffi::SQLITE_IOERR)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
