//! Unified error types for the GSE ecosystem
//!
//! This module provides a common error type [`GseError`] that can represent
//! errors from any part of the estimator. Domain-specific error types can be
//! converted to `GseError` for uniform handling at API boundaries.
//!
//! Note that expected solver outcomes (a singular gain matrix, divergence of
//! the Gauss-Newton iteration) are *not* errors: they are carried as reason
//! codes inside `ConvergenceResult` so that downstream analysis can react to
//! them. `GseError` covers the cases where a computation could not be set up
//! at all.

use thiserror::Error;

/// Unified error type for all GSE operations.
#[derive(Error, Debug)]
pub enum GseError {
    /// I/O errors (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors (bad measurement data, inconsistent inputs)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors (too few measurements, missing slack bus,
    /// non-positive variance) - rejected before iterating, never retried
    #[error("Configuration error: {0}")]
    Config(String),

    /// Linear algebra / solver setup errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Network structure errors
    #[error("Network error: {0}")]
    Network(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using GseError.
pub type GseResult<T> = Result<T, GseError>;

impl From<anyhow::Error> for GseError {
    fn from(err: anyhow::Error) -> Self {
        GseError::Other(err.to_string())
    }
}

impl From<String> for GseError {
    fn from(s: String) -> Self {
        GseError::Other(s)
    }
}

impl From<&str> for GseError {
    fn from(s: &str) -> Self {
        GseError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for GseError {
    fn from(err: serde_json::Error) -> Self {
        GseError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GseError::Config("only 3 active measurements for 17 states".into());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("active measurements"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let gse_err: GseError = io_err.into();
        assert!(matches!(gse_err, GseError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> GseResult<()> {
            Err(GseError::Validation("test".into()))
        }

        fn outer() -> GseResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
