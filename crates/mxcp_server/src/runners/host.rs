//! Host-language runner.
//!
//! Host endpoints reference a `{file, function}` in a pre-compiled module
//! table registered by the embedding layer at startup. The runner passes
//! every capability a function may use (database, config view, secrets,
//! cancellation) through an explicit per-call [`HostCall`] value; nothing
//! is installed globally.

use crate::cancel::CancellationToken;
use crate::context::UserContext;
use crate::error::{ErrorKind, ServerError};
use mxcp_db::SqlSession;
use mxcp_endpoints::HostIntrospect;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by async host functions.
pub type HostFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

enum HostFnKind {
    Sync(Box<dyn Fn(HostCall) -> anyhow::Result<Value> + Send + Sync>),
    Async(Box<dyn Fn(HostCall) -> HostFuture + Send + Sync>),
}

/// Read-only configuration slice exposed to host code.
#[derive(Debug, Clone)]
pub struct HostConfigView {
    pub project: String,
    pub profile: String,
    pub readonly: bool,
}

/// Capabilities available to a host function for one call.
#[derive(Clone)]
pub struct HostRuntime {
    session: Arc<SqlSession>,
    config: Arc<HostConfigView>,
    cancel: CancellationToken,
}

impl HostRuntime {
    pub fn new(
        session: Arc<SqlSession>,
        config: Arc<HostConfigView>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            config,
            cancel,
        }
    }

    /// Run a statement on the request's session, rows as JSON objects.
    pub fn db_execute(&self, sql: &str, params: &Map<String, Value>) -> anyhow::Result<Vec<Value>> {
        let rows = self.session.execute(sql, params)?;
        Ok(rows.to_json_objects())
    }

    /// Look up a secret value by secret name and key.
    pub fn secret(&self, name: &str, key: &str) -> Option<String> {
        self.session
            .secret(name)?
            .value(key)
            .map(|v| v.to_string())
    }

    pub fn config(&self) -> &HostConfigView {
        &self.config
    }

    /// Check for cooperative cancellation; long-running host code should
    /// poll this at its own suspension points.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// One invocation of a host function.
pub struct HostCall {
    pub args: Map<String, Value>,
    pub user: UserContext,
    pub runtime: HostRuntime,
}

/// A registered host function with its introspectable signature.
pub struct HostFunction {
    name: String,
    param_names: Vec<String>,
    kind: HostFnKind,
}

impl HostFunction {
    /// Register a synchronous function; it runs on the blocking pool.
    pub fn sync<F>(name: &str, param_names: &[&str], body: F) -> Self
    where
        F: Fn(HostCall) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            param_names: param_names.iter().map(|s| s.to_string()).collect(),
            kind: HostFnKind::Sync(Box::new(body)),
        }
    }

    /// Register a cooperative-async function; it is awaited on the
    /// runtime scheduler.
    pub fn cooperative<F>(name: &str, param_names: &[&str], body: F) -> Self
    where
        F: Fn(HostCall) -> HostFuture + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            param_names: param_names.iter().map(|s| s.to_string()).collect(),
            kind: HostFnKind::Async(Box::new(body)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }
}

/// Functions grouped by module file.
#[derive(Default)]
pub struct HostModule {
    functions: HashMap<String, Arc<HostFunction>>,
}

impl HostModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, function: HostFunction) -> Self {
        self.functions
            .insert(function.name.clone(), Arc::new(function));
        self
    }
}

/// Pre-compiled module table supplied by the host integration layer.
#[derive(Default)]
pub struct HostModuleTable {
    modules: HashMap<String, HostModule>,
}

impl HostModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, file: &str, module: HostModule) {
        self.modules.insert(file.to_string(), module);
    }

    pub fn with(mut self, file: &str, module: HostModule) -> Self {
        self.register(file, module);
        self
    }

    fn resolve(&self, file: &str, function: &str) -> Option<Arc<HostFunction>> {
        self.modules.get(file)?.functions.get(function).cloned()
    }

    /// Invoke a host function with the per-call capability object. Sync
    /// functions run on the blocking pool; async functions are awaited
    /// and race the cancellation token.
    pub async fn run(
        &self,
        file: &str,
        function: &str,
        call: HostCall,
    ) -> Result<Value, ServerError> {
        let resolved = self.resolve(file, function).ok_or_else(|| {
            ServerError::internal(format!(
                "host function '{}' in module '{}' disappeared after load",
                function, file
            ))
        })?;

        let cancel = call.runtime.cancel.clone();
        if cancel.is_cancelled() {
            return Err(ServerError::cancelled());
        }

        let wrap = |e: anyhow::Error| ServerError::new(ErrorKind::HostExecution, e.to_string());

        if matches!(resolved.kind, HostFnKind::Async(_)) {
            let future = match &resolved.kind {
                HostFnKind::Async(body) => body(call),
                HostFnKind::Sync(_) => unreachable!("checked async above"),
            };
            return tokio::select! {
                result = future => result.map_err(wrap),
                _ = cancel.cancelled() => Err(ServerError::cancelled()),
            };
        }

        let handle = tokio::task::spawn_blocking(move || match &resolved.kind {
            HostFnKind::Sync(body) => body(call),
            HostFnKind::Async(_) => unreachable!("checked sync above"),
        });
        tokio::select! {
            joined = handle => match joined {
                Ok(result) => result.map_err(wrap),
                Err(join_err) => Err(ServerError::new(
                    ErrorKind::HostExecution,
                    format!("host function panicked: {}", join_err),
                )),
            },
            _ = cancel.cancelled() => Err(ServerError::cancelled()),
        }
    }
}

impl HostIntrospect for HostModuleTable {
    fn function_params(&self, file: &str, function: &str) -> Option<Vec<String>> {
        self.resolve(file, function)
            .map(|f| f.param_names.clone())
    }
}
