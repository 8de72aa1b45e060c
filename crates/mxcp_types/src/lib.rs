//! Restricted JSON-Schema type system for MXCP endpoints.
//!
//! Every endpoint parameter and return shape is described by a [`TypeSpec`]:
//! a closed set of base kinds (`string`, `number`, `integer`, `boolean`,
//! `array`, `object`) plus a small set of annotations. `$ref`, schema
//! composition (`oneOf`/`anyOf`/`allOf`), pattern properties, and
//! conditionals are deliberately unsupported so that every spec maps to a
//! concrete SQL column family and a statically-known validation path.
//!
//! # Example
//!
//! ```ignore
//! let spec = TypeSpec::object([("a", TypeSpec::integer()), ("b", TypeSpec::integer())], ["a", "b"]);
//! let coerced = validate_and_coerce(&json!({"a": 2, "b": 3}), &spec)?;
//! ```

pub mod error;
pub mod sensitive;
pub mod typespec;
pub mod validate;

pub use error::{TypeError, TypeErrorKind};
pub use sensitive::{redact_sensitive, strip_sensitive, walk_sensitive, REDACTED};
pub use typespec::{StringFormat, TypeKind, TypeSpec};
pub use validate::{validate_and_coerce, validate_output};
