//! Custom error types for the batch transcription orchestrator.
//!
//! This module provides a centralized error handling system using the `thiserror` crate
//! to define structured, typed errors with clear messages and proper error conversion.
//! Only catalog errors abort a run; everything else degrades the affected worker, job,
//! or telemetry unit and lets the rest of the batch continue.

use std::io;
use thiserror::Error;

/// Primary error type for the application, covering all possible error cases.
#[derive(Debug, Error)]
pub enum AppError {
    /// The job catalog could not be produced or read. Fatal for the run.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Errors from invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external transcription engine failed for a single job.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Worker process spawn, pinning, or pipe protocol failures.
    #[error("Worker error: {0}")]
    Worker(String),

    /// A telemetry unit could not start or write its series.
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// A progress tracker file could not be created or appended to.
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// Errors from the underlying IO system.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for operations that can fail with `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error.
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::Internal(format!("{}: {}", f(), e)))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| AppError::Internal(format!("{}: {}", msg, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }

    #[test]
    fn context_is_prepended() {
        let res: std::result::Result<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::Other, "boom"));
        let err = res.context("reading counters").unwrap_err();
        assert!(err.to_string().contains("reading counters"));
        assert!(err.to_string().contains("boom"));
    }
}
