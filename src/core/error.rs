//! SX-019: Error taxonomy for deployment runs.
//!
//! Run-level errors (`Config`, `Dependency`) abort before any remote mutation.
//! Everything else is scoped to a single stack and recorded in its outcome.
//! Recoverable conditions (no changes, cancellation, change set conflicts)
//! are outcomes, not errors, and never reach the error counter.

use crate::remote::ApiError;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for stax operations.
pub type Result<T> = std::result::Result<T, StaxError>;

#[derive(Debug, Error)]
pub enum StaxError {
    /// Malformed or missing stack definitions.
    #[error("config error: {0}")]
    Config(String),

    /// Cycle or unresolved reference in `depends_on`.
    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("cannot render template for {stack}: {reason}")]
    Render { stack: String, reason: String },

    #[error("cannot resolve parameters for {stack}: {reason}")]
    ParameterResolution { stack: String, reason: String },

    #[error("template for {stack} failed validation: {reason}")]
    Validation { stack: String, reason: String },

    /// A change set with the same deterministic name already exists.
    #[error("change set {name} already exists for {stack}")]
    ChangeSetConflict { stack: String, name: String },

    #[error("change set {name} for {stack} failed: {reason}")]
    ChangeSetFailed {
        stack: String,
        name: String,
        reason: String,
    },

    #[error("execution of {stack} ended in {status}: {reason}")]
    Execution {
        stack: String,
        status: String,
        reason: String,
    },

    /// Polling budget exhausted. Distinct from a terminal failure.
    #[error("timed out waiting for {waiting_for} on {stack} after {attempts} attempts")]
    Timeout {
        stack: String,
        waiting_for: String,
        attempts: u32,
    },

    #[error("{operation} failed for {stack}: {source}")]
    Api {
        stack: String,
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

impl StaxError {
    /// Errors that invalidate the whole run rather than a single stack.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Dependency(_))
    }

    pub(crate) fn api(stack: &str, operation: &'static str, source: ApiError) -> Self {
        Self::Api {
            stack: stack.to_string(),
            operation,
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn params(stack: &str, reason: impl Into<String>) -> Self {
        Self::ParameterResolution {
            stack: stack.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sx019_run_fatal_classification() {
        assert!(StaxError::Config("bad".into()).is_run_fatal());
        assert!(StaxError::Dependency("cycle".into()).is_run_fatal());
        assert!(!StaxError::params("app", "missing file").is_run_fatal());
        assert!(!StaxError::Timeout {
            stack: "app".into(),
            waiting_for: "change set".into(),
            attempts: 3,
        }
        .is_run_fatal());
    }

    #[test]
    fn test_sx019_api_error_chain() {
        let err = StaxError::api("app", "DescribeStacks", ApiError::Rejected("denied".into()));
        assert!(err.to_string().contains("DescribeStacks failed for app"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("request rejected: denied"));
    }
}
