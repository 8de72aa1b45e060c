//! Audit pipeline: structured, redacted, append-only invocation records.
//!
//! Every accepted invocation produces exactly one [`AuditRecord`],
//! serialized as one JSON object per line (UTF-8, LF). Records are
//! enqueued on a bounded channel and written by a dedicated thread; the
//! request path never blocks on durable persistence beyond a short
//! backpressure bound, and records are dropped (counted, warned) rather
//! than stalling a request indefinitely.
//!
//! Redaction happens *before* a record is built: callers pass input and
//! output trees that already had sensitive values replaced.

pub mod record;
pub mod retention;
pub mod writer;

pub use record::{AuditRecord, AuditStatus, UserSubset, SCHEMA_ID, SCHEMA_VERSION};
pub use retention::{sweep_file, SweepStats};
pub use writer::{AuditWriter, WriterConfig};
