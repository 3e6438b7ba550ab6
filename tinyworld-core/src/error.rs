//! Error types for the TinyWorld memory engine.

use thiserror::Error;

use crate::types::{MemoryId, MemoryTier};

/// Top-level error type for all memory operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The backing store could not complete a read or write.
    #[error("Persistence unavailable: {operation} failed: {reason}")]
    PersistenceUnavailable {
        /// Which operation failed (`put`, `list`, ...).
        operation: &'static str,
        /// Underlying cause.
        reason: String,
    },

    /// A record with the given ID was not found in the given tier.
    #[error("Memory not found: {id} ({tier})")]
    MemoryNotFound {
        /// The missing record.
        id: MemoryId,
        /// The tier that was searched.
        tier: MemoryTier,
    },

    /// The embedding provider failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The long-term similarity index could not be built or queried.
    #[error("Index error: {0}")]
    Index(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Wrap any backend failure as [`MemoryError::PersistenceUnavailable`].
    pub fn unavailable(operation: &'static str, reason: impl ToString) -> Self {
        Self::PersistenceUnavailable {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the operation might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PersistenceUnavailable { .. } | Self::Database(_) | Self::Io(_)
        )
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MemoryError>;
