//! Error types for the conversation mirror.

use std::time::Duration;

use thiserror::Error;

/// Mirror error type.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The datastore cannot be opened or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    /// No pooled connection became free before the acquire timeout.
    #[error("timed out after {0:?} waiting for a database connection")]
    PoolTimeout(Duration),
    /// The connection pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,
    /// Structurally invalid filter or time window.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    /// A conversation or stored row failed validation.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// An optional collaborator required by the operation is not configured.
    #[error("{0} is not configured")]
    CollaboratorUnavailable(&'static str),
    /// Some fetched conversations could not be stored, so the window stays unrecorded.
    #[error("sync incomplete: {failed} of {fetched} conversations failed to store")]
    IncompleteSync {
        /// Conversations that failed validation or storage.
        failed: usize,
        /// Conversations delivered by the source.
        fetched: usize,
    },
    /// The remote conversation source reported a failure.
    #[error("conversation source error: {0}")]
    Source(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Whether the failure comes from the storage layer.
    #[must_use]
    pub const fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_)
                | Self::PoolTimeout(_)
                | Self::PoolClosed
                | Self::Sqlite(_)
                | Self::TokioSqlite(_)
        )
    }

    /// Whether retrying the same write may succeed (lock contention).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(err) => is_busy(err),
            Self::TokioSqlite(tokio_rusqlite::Error::Rusqlite(err)) => is_busy(err),
            _ => false,
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Convenience result alias for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn busy_error() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    #[test]
    fn test_busy_errors_are_retryable() {
        assert!(MirrorError::Sqlite(busy_error()).is_retryable());
        assert!(
            MirrorError::TokioSqlite(tokio_rusqlite::Error::Rusqlite(busy_error())).is_retryable()
        );
        assert!(!MirrorError::InvalidFilter("start > end".to_string()).is_retryable());
    }

    #[test]
    fn test_storage_failure_classification() {
        assert!(MirrorError::PoolClosed.is_storage_failure());
        assert!(MirrorError::StorageUnavailable("disk full".to_string()).is_storage_failure());
        assert!(!MirrorError::CollaboratorUnavailable("sync service").is_storage_failure());
    }
}
