//! Server and request context.
//!
//! A [`ServerContext`] is created once at startup and passed by reference
//! everywhere; there is no process-global mutable state. It owns the
//! registry, the current SQL session (swapped whole during reload), the
//! host module table, the audit writer, and the reload state.

use crate::config::{ConfigProvider, ServerConfig};
use crate::cancel::CancellationToken;
use crate::reload::ReloadState;
use crate::runners::host::{HostConfigView, HostFunction, HostModule, HostModuleTable};
use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use mxcp_audit::{AuditWriter, UserSubset, WriterConfig};
use mxcp_db::{SessionConfig, SqlSession};
use mxcp_endpoints::{
    load_dir, Annotations, Endpoint, EndpointDetail, EndpointKind, EndpointSource, Parameter,
    Registry, Snapshot,
};
use mxcp_types::TypeSpec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info};

/// Authenticated caller identity, immutable for the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl UserContext {
    /// The `user` binding visible to policy conditions. Extra claims are
    /// flattened in; the core fields win on name collisions.
    pub fn binding(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("user_id".to_string(), opt_str(&self.user_id));
        obj.insert("role".to_string(), opt_str(&self.role));
        obj.insert(
            "permissions".to_string(),
            Value::Array(
                self.permissions
                    .iter()
                    .map(|p| Value::String(p.clone()))
                    .collect(),
            ),
        );
        obj.insert("provider".to_string(), opt_str(&self.provider));
        Value::Object(obj)
    }

    /// The identity subset persisted in audit records.
    pub fn audit_subset(&self) -> UserSubset {
        UserSubset {
            user_id: self.user_id.clone(),
            role: self.role.clone(),
            provider: self.provider.clone(),
        }
    }
}

fn opt_str(value: &Option<String>) -> Value {
    value
        .as_ref()
        .map(|s| Value::String(s.clone()))
        .unwrap_or(Value::Null)
}

/// Per-invocation context, built by the orchestrator and destroyed when
/// the request completes.
pub struct RequestContext {
    pub request_id: String,
    pub received_at: Instant,
    pub endpoint: Arc<Endpoint>,
    pub args_raw: Map<String, Value>,
    pub user: UserContext,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
    pub trace_id: Option<String>,
}

/// Lifecycle hooks collected at startup and invoked in registration
/// order by the reload controller and shutdown path.
#[derive(Default)]
pub struct LifecycleHooks {
    on_init: Vec<(String, HookFn)>,
    on_reload: Vec<(String, HookFn)>,
    on_shutdown: Vec<(String, HookFn)>,
}

type HookFn = Box<dyn Fn() + Send + Sync>;

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_init(mut self, name: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_init.push((name.to_string(), Box::new(hook)));
        self
    }

    pub fn on_reload(mut self, name: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reload.push((name.to_string(), Box::new(hook)));
        self
    }

    pub fn on_shutdown(mut self, name: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_shutdown.push((name.to_string(), Box::new(hook)));
        self
    }

    pub fn run_init(&self) {
        for (name, hook) in &self.on_init {
            debug!(hook = %name, "running on_init hook");
            hook();
        }
    }

    pub fn run_reload(&self) {
        for (name, hook) in &self.on_reload {
            debug!(hook = %name, "running on_reload hook");
            hook();
        }
    }

    pub fn run_shutdown(&self) {
        for (name, hook) in &self.on_shutdown {
            debug!(hook = %name, "running on_shutdown hook");
            hook();
        }
    }
}

/// Process-wide server state, created once at startup.
pub struct ServerContext {
    config: ServerConfig,
    registry: Registry,
    session: RwLock<Arc<SqlSession>>,
    host_modules: HostModuleTable,
    audit: Option<AuditWriter>,
    pub(crate) reload: ReloadState,
    active_requests: AtomicU64,
    hooks: LifecycleHooks,
    provider: Box<dyn ConfigProvider>,
    started_at: DateTime<Utc>,
    started_instant: Instant,
}

impl ServerContext {
    /// Bring up the configured state: resolve secrets, open the session,
    /// load endpoints, start the audit writer, run `on_init` hooks.
    pub fn initialize(
        config: ServerConfig,
        provider: Box<dyn ConfigProvider>,
        mut host_modules: HostModuleTable,
        hooks: LifecycleHooks,
    ) -> Result<Arc<Self>> {
        let secrets = provider
            .resolve_secrets(&config.secret_names)
            .context("secret resolution failed")?;

        let session = SqlSession::open(SessionConfig {
            database: config.database.clone(),
            readonly: config.readonly,
            extensions: config.extensions.clone(),
            secrets,
        })
        .context("failed to open SQL session")?;

        if config.sql_tools_enabled {
            register_sql_tools(&mut host_modules);
        }

        let outcome = load_dir(&config.repo_root, &host_modules);
        for warning in &outcome.warnings {
            info!("{}", warning);
        }
        if !outcome.is_clean() {
            let summary: Vec<String> = outcome.errors.iter().map(|e| e.to_string()).collect();
            bail!("endpoint load failed:\n{}", summary.join("\n"));
        }

        let mut endpoints = outcome.loaded;
        if config.sql_tools_enabled {
            endpoints.push(Arc::new(sql_tools_endpoint()));
        }
        info!(
            endpoints = endpoints.len(),
            profile = %config.profile,
            "endpoints loaded"
        );

        let audit = if config.audit_enabled {
            Some(
                AuditWriter::spawn(&config.audit_path, WriterConfig::default())
                    .context("failed to start audit writer")?,
            )
        } else {
            None
        };

        let registry = Registry::new(Snapshot::new(endpoints, outcome.schema_hash));

        let ctx = Arc::new(Self {
            config,
            registry,
            session: RwLock::new(Arc::new(session)),
            host_modules,
            audit,
            reload: ReloadState::new(),
            active_requests: AtomicU64::new(0),
            hooks,
            provider,
            started_at: Utc::now(),
            started_instant: Instant::now(),
        });

        ctx.hooks.run_init();
        Ok(ctx)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The current session; the clone pins it for the caller's lifetime.
    pub fn session(&self) -> Arc<SqlSession> {
        self.session.read().expect("session lock poisoned").clone()
    }

    /// Replace the session whole (reload only).
    pub(crate) fn swap_session(&self, session: Arc<SqlSession>) {
        *self.session.write().expect("session lock poisoned") = session;
    }

    pub fn host_modules(&self) -> &HostModuleTable {
        &self.host_modules
    }

    pub fn audit(&self) -> Option<&AuditWriter> {
        self.audit.as_ref()
    }

    pub fn provider(&self) -> &dyn ConfigProvider {
        self.provider.as_ref()
    }

    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::SeqCst)
    }

    /// Observable reload state, as reported by `/status`.
    pub fn reload_status(&self) -> crate::reload::ReloadStatus {
        self.reload.status(self.active_requests())
    }

    /// Count a request in; the guard counts it back out on drop.
    pub fn begin_request(self: &Arc<Self>) -> ActiveRequestGuard {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        ActiveRequestGuard { ctx: self.clone() }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_instant.elapsed().as_secs()
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// The read-only configuration slice exposed to host code.
    pub fn host_config_view(&self) -> Arc<HostConfigView> {
        Arc::new(HostConfigView {
            project: self.config.project.clone(),
            profile: self.config.profile.clone(),
            readonly: self.config.readonly,
        })
    }
}

/// RAII guard pairing `begin_request` with its decrement.
pub struct ActiveRequestGuard {
    ctx: Arc<ServerContext>,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.ctx.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Built-in SQL helper (sql_tools.enabled)
// ---------------------------------------------------------------------------

const SQL_TOOLS_MODULE: &str = "mxcp/builtin";
const SQL_TOOLS_ROW_LIMIT: usize = 1000;

fn register_sql_tools(table: &mut HostModuleTable) {
    table.register(
        SQL_TOOLS_MODULE,
        HostModule::new().with(HostFunction::sync("execute_sql", &["sql"], |call| {
            let sql = call
                .args
                .get("sql")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("'sql' argument is required"))?;
            mxcp_db::validate_read_only(sql).map_err(|e| anyhow::anyhow!("{}", e))?;

            let limited = mxcp_db::apply_row_limit(sql, SQL_TOOLS_ROW_LIMIT);
            let rows = call.runtime.db_execute(&limited, &Map::new())?;
            let row_count = rows.len();
            Ok(json!({ "rows": rows, "row_count": row_count }))
        })),
    );
}

fn sql_tools_endpoint() -> Endpoint {
    let mut sql_param = TypeSpec::string();
    sql_param.description = Some("Read-only SQL (SELECT/WITH/EXPLAIN)".to_string());

    Endpoint {
        id: "execute_sql".to_string(),
        kind: EndpointKind::Tool,
        name: "execute_sql".to_string(),
        description: Some("Run a read-only SQL query against the project database".to_string()),
        enabled: true,
        tags: vec!["sql".to_string()],
        annotations: Annotations {
            read_only: Some(true),
            ..Default::default()
        },
        parameters: vec![Parameter {
            name: "sql".to_string(),
            spec: sql_param,
        }],
        return_type: None,
        input_policies: Vec::new(),
        output_policies: Vec::new(),
        source: Some(EndpointSource::Host {
            file: SQL_TOOLS_MODULE.to_string(),
            function: "execute_sql".to_string(),
            param_names: vec!["sql".to_string()],
        }),
        timeout_secs: None,
        detail: EndpointDetail::Tool,
        tests: Vec::new(),
        path: PathBuf::from("<built-in>"),
    }
}
