//! Error types for the session layer.

use thiserror::Error;

/// Session operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Session errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Engine error (connection, execution, type conversion).
    #[error("{0}")]
    DuckDb(#[from] duckdb::Error),

    /// IO error (database file, lock file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Statement references a parameter that was not supplied.
    #[error("missing bind parameter ${0}")]
    MissingParameter(String),

    /// Write statement rejected in read-only mode.
    #[error("statement rejected in read-only mode: {0}")]
    ReadOnly(String),

    /// Secret could not be installed into the engine.
    #[error("secret '{name}': {message}")]
    Secret { name: String, message: String },

    /// Extension could not be loaded.
    #[error("extension '{name}': {message}")]
    Extension { name: String, message: String },

    /// Invalid input (identifier, parameter value).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
