//! MXCP server core: the request execution pipeline and its machinery.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MCP edge (external)                    │
//! └──────────────────────────────────────────────────────────────┘
//!                                │ invoke(endpoint_id, args, user)
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Orchestrator  │ snapshot lookup, drain gate, req context    │
//! │  Executor      │ validate → policy → run → coerce → policy   │
//! │  Runners       │ SQL (session) and host (module table)       │
//! │  Audit         │ redacted, append-only, exactly once         │
//! │  Reload        │ drain, rebuild secrets/session, swap        │
//! │  Admin         │ health/status/config/reload over UDS        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The MCP wire protocol, OAuth, and the engine internals live outside
//! this crate; they are consumed through the [`config::ConfigProvider`]
//! trait, the [`context::UserContext`] value, and the `mxcp_db` session.

pub mod admin;
pub mod cancel;
pub mod config;
pub mod context;
pub mod drift;
pub mod error;
pub mod executor;
pub mod logging;
pub mod orchestrator;
pub mod reload;
pub mod runners;
pub mod signals;

pub use cancel::CancellationToken;
pub use config::{
    ConfigProvider, EnvConfigProvider, ServerConfig, SiteConfig, StaticSecrets,
};
pub use context::{LifecycleHooks, RequestContext, ServerContext, UserContext};
pub use error::{ErrorKind, ServerError};
pub use orchestrator::{InvokeOptions, Server};
pub use reload::{ReloadError, ReloadStatus};
pub use runners::{HostCall, HostFunction, HostModule, HostModuleTable, HostRuntime};
