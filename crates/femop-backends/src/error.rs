//! Error types for backend operations

use std::fmt;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur during backend execution
///
/// None of these are retried: a failing device aborts whatever timing run
/// issued the work.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Invalid buffer handle
    #[error("invalid buffer handle: {0}")]
    InvalidBufferHandle(u64),

    /// Invalid index map handle
    #[error("invalid index handle: {0}")]
    InvalidIndexHandle(u64),

    /// Host slice or peer buffer length differs from the buffer length
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// An index map entry points outside its target buffer
    #[error("index {index} out of bounds for buffer of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Matrix buffer length does not match `rows * cols`
    #[error("matrix shape {rows}x{cols} does not match buffer length {len}")]
    MatrixShape { rows: usize, cols: usize, len: usize },

    /// The same buffer was passed as kernel input and output
    #[error("buffer {0} used as both input and output")]
    Aliased(u64),

    /// Device not present or failed to initialise
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Kernel compilation or launch failed
    #[error("kernel launch failed: {0}")]
    LaunchFailed(String),

    /// Invalid launch configuration
    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Create a length mismatch error
    pub fn length_mismatch(expected: usize, actual: usize) -> Self {
        Self::LengthMismatch { expected, actual }
    }

    /// Create a launch failure from any displayable driver error
    pub fn launch_failed(err: impl fmt::Display) -> Self {
        Self::LaunchFailed(err.to_string())
    }
}
