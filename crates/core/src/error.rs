//! Unified error types for the data hub.
//!
//! Display strings carry a stable code prefix so tool callers can match on
//! the failure kind without parsing the detail.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the data hub.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty key, zero TTL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No cache entry found for the given key.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Every codec in the chain refused the value, or a stored envelope
    /// could not be decoded.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// The requested domain has no active source.
    #[error("SOURCE_NOT_CONFIGURED: {0}")]
    SourceNotConfigured(String),

    /// A source with this id is already registered.
    #[error("DUPLICATE_SOURCE: {0}")]
    DuplicateSource(String),

    /// No source with this id is registered.
    #[error("SOURCE_NOT_FOUND: {0}")]
    SourceNotFound(String),

    /// The upstream fetch collaborator reported a failure.
    #[error("FETCH_FAILED: {source_id}: {message}")]
    FetchFailed { source_id: String, message: String },

    /// The durable store cannot be reached.
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A persisted row could not be interpreted (bad timestamp, unknown enum tag).
    #[error("CORRUPT_ENTRY: {0}")]
    CorruptEntry(String),
}

impl Error {
    /// Collapse low-level persistence failures into `StoreUnavailable`.
    ///
    /// Domain errors pass through untouched.
    pub fn into_store_unavailable(self) -> Self {
        match self {
            Error::Database(e) => Error::StoreUnavailable(e.to_string()),
            Error::MigrationFailed(msg) => Error::StoreUnavailable(msg),
            other => other,
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::StoreUnavailable("connection closed".into()),
            tokio_rusqlite::Error::Close(_) => Error::StoreUnavailable("connection closing".into()),
            _ => Error::StoreUnavailable("connection closed".into()),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::ConnectionClosed => Error::StoreUnavailable("connection closed".into()),
            other => Error::Database(other),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) => -32602,
            Error::CacheMiss(_) => -32001,
            Error::Database(_) | Error::MigrationFailed(_) => -32002,
            Error::Serialization(_) => -32003,
            Error::SourceNotConfigured(_) => -32004,
            Error::DuplicateSource(_) => -32005,
            Error::SourceNotFound(_) => -32006,
            Error::FetchFailed { .. } => -32007,
            Error::StoreUnavailable(_) => -32008,
            Error::CorruptEntry(_) => -32009,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CacheMiss("price:AAPL".to_string());
        assert!(err.to_string().contains("CACHE_MISS"));
        assert!(err.to_string().contains("price:AAPL"));

        let err = Error::FetchFailed { source_id: "fred".into(), message: "timeout".into() };
        assert_eq!(err.to_string(), "FETCH_FAILED: fred: timeout");
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::DuplicateSource("fred".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32005);
        assert!(mcp_err.message.contains("DUPLICATE_SOURCE"));
    }

    #[test]
    fn test_database_error_becomes_store_unavailable() {
        let err = Error::from(rusqlite::Error::InvalidQuery).into_store_unavailable();
        assert!(matches!(err, Error::StoreUnavailable(_)));

        let err = Error::SourceNotFound("x".into()).into_store_unavailable();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }

    #[test]
    fn test_closed_connection_maps_to_store_unavailable() {
        let err: Error = tokio_rusqlite::Error::<rusqlite::Error>::ConnectionClosed.into();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }
}
