//! Local-only admin surface.
//!
//! A small REST API served on a Unix domain socket with owner-only
//! permissions. The transport is filesystem-permission-gated, so no
//! authentication is layered on top.
//!
//! Operations: `GET /health`, `GET /status`, `GET /config`,
//! `POST /reload`.

use crate::context::ServerContext;
use crate::drift;
use crate::reload::{self, ReloadStatus};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use mxcp_endpoints::EndpointKind;
use serde::Serialize;
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Error envelope returned on failure.
#[derive(Debug, Serialize)]
pub struct AdminError {
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EndpointCounts {
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub pid: u32,
    pub profile: String,
    pub mode: String,
    pub endpoints: EndpointCounts,
    pub reload: ReloadStatus,
}

/// Build the admin router over shared server state.
pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/config", get(config))
        .route("/reload", post(reload_handler))
        .route("/drift", post(drift_handler))
        .with_state(ctx)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

fn endpoint_counts(ctx: &ServerContext) -> EndpointCounts {
    let snapshot = ctx.registry().current();
    EndpointCounts {
        tools: snapshot.count(EndpointKind::Tool),
        prompts: snapshot.count(EndpointKind::Prompt),
        resources: snapshot.count(EndpointKind::Resource),
    }
}

async fn status(State(ctx): State<Arc<ServerContext>>) -> Json<StatusResponse> {
    let mode = if ctx.config().readonly {
        "readonly"
    } else {
        "readwrite"
    };
    Json(StatusResponse {
        version: ctx.version().to_string(),
        uptime_seconds: ctx.uptime_secs(),
        pid: std::process::id(),
        profile: ctx.config().profile.clone(),
        mode: mode.to_string(),
        endpoints: endpoint_counts(&ctx),
        reload: ctx.reload_status(),
    })
}

/// Configuration metadata only; secret material is never exposed here.
async fn config(State(ctx): State<Arc<ServerContext>>) -> Json<serde_json::Value> {
    let counts = endpoint_counts(&ctx);
    Json(json!({
        "project": ctx.config().project,
        "profile": ctx.config().profile,
        "endpoints": counts,
        "features": {
            "sql_tools": ctx.config().sql_tools_enabled,
            "audit": ctx.config().audit_enabled,
            "readonly": ctx.config().readonly,
        },
    }))
}

async fn reload_handler(State(ctx): State<Arc<ServerContext>>) -> Json<serde_json::Value> {
    let reload_request_id = Uuid::new_v4().to_string();
    let task_ctx = ctx.clone();
    let task_id = reload_request_id.clone();
    tokio::spawn(async move {
        if let Err(e) = reload::run(&task_ctx, false).await {
            warn!(reload_request_id = %task_id, error = %e, "admin-triggered reload failed");
        }
    });
    Json(json!({
        "status": "reload_initiated",
        "reload_request_id": reload_request_id,
    }))
}

/// Write a drift snapshot for external drift tooling.
async fn drift_handler(
    State(ctx): State<Arc<ServerContext>>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let path = ctx
        .config()
        .drift_path
        .clone()
        .unwrap_or_else(|| ctx.config().repo_root.join("drift-snapshot.json"));

    let task_ctx = ctx.clone();
    let task_path = path.clone();
    tokio::task::spawn_blocking(move || drift::write_snapshot(&task_ctx, &task_path))
        .await
        .map_err(|e| AdminError {
            error_code: "drift_task_failed".to_string(),
            message: "drift snapshot task failed".to_string(),
            detail: Some(e.to_string()),
        })?
        .map_err(|e| AdminError {
            error_code: "drift_failed".to_string(),
            message: "drift snapshot generation failed".to_string(),
            detail: Some(format!("{:#}", e)),
        })?;

    Ok(Json(json!({
        "status": "drift_written",
        "path": path.display().to_string(),
    })))
}

/// Serve the admin API on a Unix domain socket with `0o600` permissions.
pub async fn serve(ctx: Arc<ServerContext>, socket_path: &Path) -> anyhow::Result<()> {
    // A stale socket from a previous run refuses the bind.
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let listener = tokio::net::UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    info!(socket = %socket_path.display(), "admin surface listening");

    axum::serve(listener, router(ctx)).await?;
    Ok(())
}
