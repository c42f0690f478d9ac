//! Error types for document encoding and validation.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding documents.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The document does not satisfy its collection's schema.
    ///
    /// Always surfaced to the caller, never retried.
    #[error("validation failed: {message}")]
    Validation {
        /// Description of the violated rule.
        message: String,
    },

    /// The raw bytes are not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The raw bytes decoded to something other than a JSON object.
    #[error("document is not a JSON object")]
    NotAnObject,
}

impl CodecError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
