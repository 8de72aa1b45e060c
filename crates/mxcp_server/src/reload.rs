//! Hot reload: drain, rebuild, swap, or roll back.
//!
//! One reload at a time, enforced by a test-and-set guard. New requests
//! keep being accepted during the drain but pause on the readiness gate
//! in the orchestrator; in-flight requests complete against the state
//! they started with. On any rebuild failure the previous session and
//! registry stay untouched and the failure is reported through `/status`.

use crate::context::ServerContext;
use chrono::{DateTime, Utc};
use mxcp_db::{SessionConfig, SqlSession};
use mxcp_endpoints::{load_dir, Snapshot};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Poll interval while waiting for in-flight requests to finish.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Observable reload state.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadStatus {
    pub in_progress: bool,
    pub draining: bool,
    pub active_requests: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reload_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reload_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reload_error: Option<String>,
}

#[derive(Debug, Default)]
struct LastReload {
    at: Option<DateTime<Utc>>,
    status: Option<String>,
    error: Option<String>,
}

/// Reload bookkeeping owned by the server context.
pub struct ReloadState {
    in_progress: AtomicBool,
    draining_tx: watch::Sender<bool>,
    draining_rx: watch::Receiver<bool>,
    last: Mutex<LastReload>,
}

impl ReloadState {
    pub fn new() -> Self {
        let (draining_tx, draining_rx) = watch::channel(false);
        Self {
            in_progress: AtomicBool::new(false),
            draining_tx,
            draining_rx,
            last: Mutex::new(LastReload::default()),
        }
    }

    pub fn is_draining(&self) -> bool {
        *self.draining_rx.borrow()
    }

    /// A receiver for the orchestrator's readiness gate.
    pub fn draining_gate(&self) -> watch::Receiver<bool> {
        self.draining_rx.clone()
    }

    fn set_draining(&self, draining: bool) {
        // send only fails with no receivers; we always hold one.
        let _ = self.draining_tx.send(draining);
    }

    fn record_success(&self) {
        let mut last = self.last.lock().expect("reload status lock poisoned");
        last.at = Some(Utc::now());
        last.status = Some("success".to_string());
        last.error = None;
    }

    fn record_error(&self, message: String) {
        let mut last = self.last.lock().expect("reload status lock poisoned");
        last.at = Some(Utc::now());
        last.status = Some("error".to_string());
        last.error = Some(message);
    }

    pub fn status(&self, active_requests: u64) -> ReloadStatus {
        let last = self.last.lock().expect("reload status lock poisoned");
        ReloadStatus {
            in_progress: self.in_progress.load(Ordering::SeqCst),
            draining: self.is_draining(),
            active_requests,
            last_reload_at: last.at,
            last_reload_status: last.status.clone(),
            last_reload_error: last.error.clone(),
        }
    }
}

impl Default for ReloadState {
    fn default() -> Self {
        Self::new()
    }
}

/// Reload failure, also recorded in the observable status.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("reload already in progress")]
    AlreadyInProgress,
    #[error("drain timed out with {0} requests still in flight")]
    DrainTimeout(u64),
    #[error("reload failed: {0}")]
    Rebuild(String),
}

/// Run one reload: drain, re-resolve secrets, rebuild the session, swap.
///
/// `reload_endpoints` additionally re-loads endpoint definitions from the
/// project tree; the default reload refreshes config and session only.
pub async fn run(ctx: &Arc<ServerContext>, reload_endpoints: bool) -> Result<(), ReloadError> {
    let state = &ctx.reload;

    if state
        .in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ReloadError::AlreadyInProgress);
    }

    info!(reload_endpoints, "reload started, draining requests");
    state.set_draining(true);

    // Wait for in-flight requests, bounded by the drain timeout.
    let drained = tokio::time::timeout(ctx.config().drain_timeout, async {
        while ctx.active_requests() > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    })
    .await;

    if drained.is_err() {
        let still_active = ctx.active_requests();
        warn!(still_active, "reload drain timed out, aborting");
        state.set_draining(false);
        state.in_progress.store(false, Ordering::SeqCst);
        state.record_error(format!(
            "drain timed out with {} requests still in flight",
            still_active
        ));
        return Err(ReloadError::DrainTimeout(still_active));
    }

    let result = rebuild(ctx, reload_endpoints).await;

    match &result {
        Ok(()) => {
            ctx.hooks().run_reload();
            state.record_success();
            info!("reload complete");
        }
        Err(message) => {
            // Previous session and registry remain untouched.
            error!(error = %message, "reload failed, previous state kept");
            state.record_error(message.clone());
        }
    }

    state.set_draining(false);
    state.in_progress.store(false, Ordering::SeqCst);

    result.map_err(ReloadError::Rebuild)
}

/// Build candidate state; nothing is published until every step works.
async fn rebuild(ctx: &Arc<ServerContext>, reload_endpoints: bool) -> Result<(), String> {
    let config = ctx.config();

    let secrets = ctx
        .provider()
        .resolve_secrets(&config.secret_names)
        .map_err(|e| format!("secret resolution failed: {:#}", e))?;

    let session_config = SessionConfig {
        database: config.database.clone(),
        readonly: config.readonly,
        extensions: config.extensions.clone(),
        secrets,
    };
    let candidate = tokio::task::spawn_blocking(move || SqlSession::open(session_config))
        .await
        .map_err(|e| format!("session build task failed: {}", e))?
        .map_err(|e| format!("session build failed: {}", e))?;

    let candidate_snapshot = if reload_endpoints {
        let root = config.repo_root.clone();
        // The loader is filesystem-only, but large trees should not stall
        // the runtime.
        let outcome = {
            let load_ctx = ctx.clone();
            tokio::task::spawn_blocking(move || load_dir(&root, load_ctx.host_modules()))
                .await
                .map_err(|e| format!("endpoint load task failed: {}", e))?
        };
        if !outcome.is_clean() {
            let summary: Vec<String> = outcome.errors.iter().map(|e| e.to_string()).collect();
            return Err(format!("endpoint load failed: {}", summary.join("; ")));
        }
        Some(Snapshot::new(outcome.loaded, outcome.schema_hash))
    } else {
        None
    };

    // Atomically publish: session first, then the registry snapshot.
    ctx.swap_session(Arc::new(candidate));
    if let Some(snapshot) = candidate_snapshot {
        ctx.registry().publish(snapshot);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reflects_recorded_outcome() {
        let state = ReloadState::new();
        let status = state.status(0);
        assert!(!status.in_progress);
        assert!(status.last_reload_status.is_none());

        state.record_error("boom".to_string());
        let status = state.status(2);
        assert_eq!(status.active_requests, 2);
        assert_eq!(status.last_reload_status.as_deref(), Some("error"));
        assert_eq!(status.last_reload_error.as_deref(), Some("boom"));

        state.record_success();
        let status = state.status(0);
        assert_eq!(status.last_reload_status.as_deref(), Some("success"));
        assert!(status.last_reload_error.is_none());
    }

    #[test]
    fn test_draining_gate_observes_changes() {
        let state = ReloadState::new();
        let gate = state.draining_gate();
        assert!(!*gate.borrow());
        state.set_draining(true);
        assert!(*gate.borrow());
        assert!(state.is_draining());
    }
}
