/*!
Error types for the TaskFlow storage layer.
*/

use thiserror::Error;

/// Result type used throughout the TaskFlow core.
pub type Result<T> = std::result::Result<T, TaskflowError>;

/// Errors that can occur while reading or writing the key-value namespace.
#[derive(Error, Debug)]
pub enum TaskflowError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store refused a write because the namespace is full
    #[error("Storage quota exceeded writing '{key}': {required} units required, {available} available")]
    QuotaExceeded {
        key: String,
        required: usize,
        available: usize,
    },

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stored text is not a well-formed envelope or export file
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A document presented for import lacks required top-level fields
    #[error("Invalid import document: {0}")]
    ImportShape(String),

    /// Lookup of a task or key that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),
}

impl TaskflowError {
    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a new import shape error
    pub fn import_shape<S: Into<String>>(msg: S) -> Self {
        Self::ImportShape(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// True when the underlying store rejected the write for lack of space
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}
