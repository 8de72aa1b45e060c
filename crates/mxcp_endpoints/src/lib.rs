//! Endpoint definitions: YAML loader, validated IR, and registry.
//!
//! Endpoints are declared one per YAML file and classified by their root
//! key (`tool`, `resource`, or `prompt`). The loader parses, validates,
//! and resolves each file into an immutable [`Endpoint`] IR; the
//! [`Registry`] publishes them as atomic snapshots so in-flight requests
//! keep a consistent view across hot reloads.
//!
//! The loader is pure with respect to the filesystem: it never opens a
//! database session or a socket.

pub mod ir;
pub mod loader;
pub mod registry;
pub mod uri;

pub use ir::{
    Annotations, Endpoint, EndpointDetail, EndpointKind, EndpointSource, EndpointTest, Parameter,
    PromptMessage,
};
pub use loader::{load_dir, HostIntrospect, LoadError, LoadOutcome, NoHostModules};
pub use registry::{Registry, Snapshot};
pub use uri::UriTemplate;
