//! Process signal handling.
//!
//! `SIGHUP` triggers a reload; `SIGTERM`/`SIGINT` initiate graceful
//! shutdown (drain in-flight requests, run shutdown hooks, close the
//! audit writer). A reload that left the server in a failed state turns
//! the shutdown into a non-zero exit.

use crate::context::ServerContext;
use crate::reload;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Run until a termination signal arrives, servicing `SIGHUP` reloads.
pub async fn run_until_shutdown(ctx: Arc<ServerContext>) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading");
                let reload_ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = reload::run(&reload_ctx, false).await {
                        warn!(error = %e, "signal-triggered reload failed");
                    }
                });
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            _ = interrupt.recv() => {
                info!("SIGINT received, shutting down");
                break;
            }
        }
    }

    shutdown(&ctx).await;
    exit_status(&ctx)
}

/// Final process outcome: a reload that left the server in a failed
/// state turns an otherwise clean shutdown into a non-zero exit.
pub fn exit_status(ctx: &ServerContext) -> anyhow::Result<()> {
    let reload_status = ctx.reload_status();
    if reload_status.last_reload_status.as_deref() == Some("error") {
        anyhow::bail!(
            "last reload left the server in a failed state: {}",
            reload_status
                .last_reload_error
                .unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

/// Graceful shutdown: wait briefly for in-flight requests, then run the
/// shutdown hooks.
async fn shutdown(ctx: &Arc<ServerContext>) {
    let drain = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while ctx.active_requests() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    if drain.is_err() {
        warn!(
            active = ctx.active_requests(),
            "shutdown proceeding with requests still in flight"
        );
    }

    ctx.hooks().run_shutdown();
    if ctx.config().admin_enabled {
        let _ = std::fs::remove_file(&ctx.config().admin_socket);
    }
    info!("shutdown complete");
}
