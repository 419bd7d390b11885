//! Error taxonomy shared by every public entry point.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GemmError>;

#[derive(Error, Debug)]
pub enum GemmError {
    /// Unknown backend name, unsupported bit width, bad config values.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation called in the wrong engine state (e.g. LUT not generated).
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Inner dimensions or buffer lengths do not agree.
    #[error("dimension mismatch in {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An operand code falls outside the lookup table.
    #[error("code {code} out of range (limit {limit})")]
    InvalidCode { code: usize, limit: usize },

    /// Aligned allocation failed or its size overflowed.
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// A worker thread panicked; reported after all workers joined.
    #[error("worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GemmError {
    pub(crate) fn dims(what: &'static str, expected: usize, actual: usize) -> Self {
        GemmError::DimensionMismatch { what, expected, actual }
    }
}
