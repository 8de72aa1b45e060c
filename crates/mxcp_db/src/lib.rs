//! SQL session layer over DuckDB.
//!
//! A [`SqlSession`] wraps one embedded connection plus the secrets
//! resolved for the active profile. Sessions are opened whole, shared
//! behind an `Arc` for the duration of in-flight requests, and replaced
//! whole during reload; there is no mid-request swap.
//!
//! DuckDB is columnar, OLAP optimized, and enforces a single-writer
//! model; statement execution serializes on an internal mutex while the
//! connection supports concurrent read cursors at the engine level.

pub mod bind;
pub mod error;
pub mod session;
pub mod sql_guard;
pub mod value;

pub use bind::bind_named;
pub use error::{DbError, Result};
pub use session::{Secret, SessionConfig, SqlSession};
pub use sql_guard::{apply_row_limit, validate_read_only};
pub use value::{DbValue, Row, Rows};
