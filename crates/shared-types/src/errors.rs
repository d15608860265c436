//! # Error Types
//!
//! Errors shared by storage adapters and their consumers.

use thiserror::Error;

/// Errors reported by the key-value storage behind the beacon chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Requested entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entry exists but could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Batch write failed; nothing from the batch was applied.
    #[error("Batch write failed: {0}")]
    BatchFailed(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),
}
