//! Error types for agent-memory

use thiserror::Error;

/// Main error type for the memory system
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Storage engine operation failed (no retry is attempted)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Session, memory or other record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Search index error (Tantivy)
    #[error("Search index error: {0}")]
    SearchIndex(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MemoryError {
    /// Whether this error reports a missing record
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoryError::NotFound(_))
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

impl From<tantivy::TantivyError> for MemoryError {
    fn from(e: tantivy::TantivyError) -> Self {
        MemoryError::SearchIndex(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MemoryError>;
