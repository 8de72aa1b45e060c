//! Request orchestrator: the entry point from the MCP edge.
//!
//! The wire transport is outside this crate; whatever speaks MCP hands
//! invocations to [`Server::invoke`]. The orchestrator looks the endpoint
//! up in the current registry snapshot, waits out a reload drain if one
//! is in progress, builds the request context, and delegates to the
//! executor.

use crate::cancel::CancellationToken;
use crate::context::{RequestContext, ServerContext, UserContext};
use crate::error::{ErrorKind, ServerError};
use crate::executor;
use mxcp_audit::{AuditRecord, AuditStatus};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Per-invocation options supplied by the edge.
#[derive(Default)]
pub struct InvokeOptions {
    /// Explicit deadline from the edge; combined with the endpoint and
    /// server defaults (the minimum wins).
    pub timeout: Option<Duration>,
    /// Externally owned cancellation token (client disconnect).
    pub cancel: Option<CancellationToken>,
    /// Propagated trace id, recorded in the audit log.
    pub trace_id: Option<String>,
}

/// The invocable server facade.
pub struct Server {
    ctx: Arc<ServerContext>,
}

impl Server {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Invoke an endpoint with default options.
    pub async fn invoke(
        &self,
        endpoint_id: &str,
        args: Map<String, Value>,
        user: UserContext,
    ) -> Result<Value, ServerError> {
        self.invoke_with(endpoint_id, args, user, InvokeOptions::default())
            .await
    }

    /// Invoke an endpoint.
    pub async fn invoke_with(
        &self,
        endpoint_id: &str,
        args: Map<String, Value>,
        user: UserContext,
        options: InvokeOptions,
    ) -> Result<Value, ServerError> {
        let received_at = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let cancel = options.cancel.unwrap_or_default();

        // Provisional deadline before the endpoint is known.
        let server_timeout = self.ctx.config().request_timeout;
        let edge_timeout = options.timeout.unwrap_or(server_timeout).min(server_timeout);

        // Readiness gate: during a reload drain, new requests wait here
        // (bounded by their own deadline) and then proceed against the
        // post-reload state.
        if let Err(err) = self.wait_until_ready(received_at + edge_timeout).await {
            self.audit_rejection(&request_id, endpoint_id, &user, received_at, &err)
                .await;
            return Err(err);
        }

        let snapshot = self.ctx.registry().current();
        let endpoint = match snapshot.get(endpoint_id) {
            Some(endpoint) if endpoint.enabled => endpoint.clone(),
            _ => {
                let err = ServerError::not_found(endpoint_id);
                self.audit_rejection(&request_id, endpoint_id, &user, received_at, &err)
                    .await;
                return Err(err);
            }
        };

        // Final deadline: minimum of edge, endpoint, and server default.
        let timeout = endpoint
            .timeout_secs
            .map(Duration::from_secs)
            .map(|endpoint_timeout| endpoint_timeout.min(edge_timeout))
            .unwrap_or(edge_timeout);

        let req = RequestContext {
            request_id,
            received_at,
            endpoint,
            args_raw: args,
            user,
            deadline: Some(received_at + timeout),
            cancel,
            trace_id: options.trace_id,
        };

        debug!(request_id = %req.request_id, endpoint = %endpoint_id, "request accepted");
        let _guard = self.ctx.begin_request();
        executor::execute(&self.ctx, &req).await
    }

    /// Wait for the drain gate to clear, bounded by the deadline.
    async fn wait_until_ready(&self, deadline: Instant) -> Result<(), ServerError> {
        let mut gate = self.ctx.reload.draining_gate();
        while *gate.borrow() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ServerError::new(
                    ErrorKind::Unavailable,
                    "server is draining for reload",
                ));
            }
            match tokio::time::timeout(remaining, gate.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => {
                    return Err(ServerError::internal("drain gate closed unexpectedly"));
                }
                Err(_) => {
                    return Err(ServerError::new(
                        ErrorKind::Unavailable,
                        "server is draining for reload",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Requests rejected before the executor still get their one audit
    /// record.
    async fn audit_rejection(
        &self,
        request_id: &str,
        endpoint_id: &str,
        user: &UserContext,
        received_at: Instant,
        err: &ServerError,
    ) {
        let Some(writer) = self.ctx.audit() else {
            return;
        };
        let mut record = AuditRecord::new(request_id, "unknown", endpoint_id);
        record.user = user.audit_subset();
        record.duration_ms = received_at.elapsed().as_millis() as u64;
        record.status = AuditStatus::Error;
        record.error_kind = Some(err.kind.as_str().to_string());
        record.error_message = Some(err.message.clone());
        writer.enqueue(record).await;
    }
}
