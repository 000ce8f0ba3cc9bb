//! Error types for the SQLite offline queue.

use quad_storage_traits::OfflineQueueError;

/// Error type for SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SQLite database error
    #[error("Database error: {0}")]
    Database(String),
    /// Error from rusqlite
    #[error("SQLite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Database(format!("IO error: {}", e))
    }
}

impl From<Error> for OfflineQueueError {
    fn from(e: Error) -> Self {
        Self::Storage(e.to_string())
    }
}
