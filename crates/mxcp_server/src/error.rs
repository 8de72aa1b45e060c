//! The request error taxonomy.
//!
//! Every failure on the request path is mapped into one [`ErrorKind`]
//! before it is audited or surfaced. Truly unexpected conditions become
//! `Internal`; their detail is only exposed to clients in debug mode.

use mxcp_types::TypeError;
use serde::Serialize;
use thiserror::Error;

/// Classified request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    BadInput,
    PolicyDenied,
    NotFound,
    Unavailable,
    SqlExecution,
    HostExecution,
    NoRows,
    TooManyRows,
    ColumnMismatch,
    BadOutput,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Stable name recorded in the audit log.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadInput => "BadInput",
            Self::PolicyDenied => "PolicyDenied",
            Self::NotFound => "NotFound",
            Self::Unavailable => "Unavailable",
            Self::SqlExecution => "SQLExecution",
            Self::HostExecution => "HostExecution",
            Self::NoRows => "NoRows",
            Self::TooManyRows => "TooManyRows",
            Self::ColumnMismatch => "ColumnMismatch",
            Self::BadOutput => "BadOutput",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified request failure with its client-facing message.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ServerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Structured validation failure with JSON paths in the message.
    pub fn bad_input(errors: &[TypeError]) -> Self {
        Self::new(ErrorKind::BadInput, join_errors(errors))
    }

    pub fn bad_output(errors: &[TypeError]) -> Self {
        Self::new(ErrorKind::BadOutput, join_errors(errors))
    }

    pub fn policy_denied(reason: &str) -> Self {
        Self::new(
            ErrorKind::PolicyDenied,
            format!("policy enforcement failed: {}", reason),
        )
    }

    pub fn not_found(endpoint_id: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("endpoint '{}' is unknown or disabled", endpoint_id),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request was cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<mxcp_db::DbError> for ServerError {
    fn from(err: mxcp_db::DbError) -> Self {
        // Engine messages pass through; the kind stays SqlExecution for
        // anything the session layer reports.
        Self::new(ErrorKind::SqlExecution, err.to_string())
    }
}

fn join_errors(errors: &[TypeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mxcp_types::TypeErrorKind;

    #[test]
    fn test_bad_input_includes_paths() {
        let errors = vec![TypeError::new(
            TypeErrorKind::TypeMismatch,
            "$.a",
            "expected integer, got string",
        )];
        let err = ServerError::bad_input(&errors);
        assert_eq!(err.kind, ErrorKind::BadInput);
        assert!(err.message.contains("$.a"));
    }

    #[test]
    fn test_policy_denied_surface_format() {
        let err = ServerError::policy_denied("no guests");
        assert_eq!(err.to_string(), "PolicyDenied: policy enforcement failed: no guests");
    }
}
