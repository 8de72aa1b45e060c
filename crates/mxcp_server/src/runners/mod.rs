//! Endpoint runners.
//!
//! Two runner variants share one invocation contract: given the endpoint,
//! the validated arguments, the caller, and the active session, produce a
//! result value. The SQL runner shapes rows to the declared return type;
//! the host runner calls a registered function with an explicit per-call
//! capability object. Prompt endpoints render their message templates.

pub mod host;
pub mod prompt;
pub mod sql;

pub use host::{HostCall, HostFunction, HostModule, HostModuleTable, HostRuntime};
pub use prompt::render_prompt;
pub use sql::run_sql;
