//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested file or directory does not exist.
    ///
    /// Read paths translate this to "absent" rather than failing.
    #[error("not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// Rename kept failing after exhausting the retry budget.
    #[error("rename of {path} failed after {attempts} attempts: {message}")]
    RenameExhausted {
        /// The rename target.
        path: PathBuf,
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying error.
        message: String,
    },

    /// A coalesced write completed with an error.
    ///
    /// Callers whose payload was superseded receive the outcome of the
    /// write that covered it; on failure the original error has already
    /// been consumed by the owning caller, so only its message survives.
    #[error("write to {path} failed: {message}")]
    WriteFailed {
        /// The write target.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

impl StorageError {
    /// Creates a not-found error for the given path.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Returns `true` if this error is a not-found miss.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
