//! Error types for femop-core operations

use femop_backends::BackendError;

/// Result type for femop-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in femop-core operations
///
/// Dimension and length mismatches are programming errors in how operators
/// were composed or called. They are reported at the call site and never
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device or runtime failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Sub-operator dimensions do not compose
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Vector length differs from what the operation requires
    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Rejected benchmark or space configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Writing the report failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn dimension(context: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            actual,
        }
    }

    pub(crate) fn length(expected: usize, actual: usize) -> Self {
        Self::LengthMismatch { expected, actual }
    }
}
