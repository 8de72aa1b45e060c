//! Shared logging setup for the server binary.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "mxcp=info,mxcp_server=info,mxcp_endpoints=info,mxcp_db=info";

/// Log filter environment variable.
pub const LOG_ENV: &str = "MXCP_LOG";

/// Initialize tracing with a stderr layer and an optional ANSI-free file
/// layer. `verbose` widens the default filter to debug.
pub fn init_logging(log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "mxcp=debug,mxcp_server=debug,mxcp_endpoints=debug,mxcp_db=debug"
    } else {
        DEFAULT_LOG_FILTER
    };
    let make_filter = || {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(make_filter());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_filter(make_filter());
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
        }
    }

    Ok(())
}
