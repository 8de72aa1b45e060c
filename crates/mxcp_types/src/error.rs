//! Validation error types.

use serde::Serialize;
use thiserror::Error;

/// Classification of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeErrorKind {
    /// Value has the wrong base kind.
    TypeMismatch,
    /// Numeric or length bound violated.
    RangeViolation,
    /// String does not satisfy its declared format.
    FormatViolation,
    /// Required property is absent and has no default.
    MissingRequired,
    /// Property not declared while `additionalProperties` is false.
    UnknownProperty,
    /// Value is not one of the declared enum members.
    EnumViolation,
}

impl TypeErrorKind {
    /// Stable machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TypeMismatch => "type_mismatch",
            Self::RangeViolation => "range_violation",
            Self::FormatViolation => "format_violation",
            Self::MissingRequired => "missing_required",
            Self::UnknownProperty => "unknown_property",
            Self::EnumViolation => "enum_violation",
        }
    }
}

/// A single validation failure, anchored at a `$`-rooted JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{path}: {message}")]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub path: String,
    pub message: String,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}
