//! Error types for the store module.

use dslcrypt_core::ObjectId;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Object created twice.
    #[error("object already exists: {0}")]
    ObjectExists(ObjectId),

    /// The transaction was rejected and nothing was applied.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
