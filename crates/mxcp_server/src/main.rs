//! The `mxcp` server binary.
//!
//! Loads the site config, brings up the server context, serves the admin
//! surface, and waits for signals. The MCP transport attaches through the
//! embedding layer; this binary owns process lifecycle only.

use anyhow::Context;
use clap::Parser;
use mxcp_server::{
    admin, config::EnvConfigProvider, logging, signals, HostModuleTable, LifecycleHooks,
    ServerConfig, ServerContext, SiteConfig,
};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "mxcp", version, about = "MXCP endpoint server")]
struct Args {
    /// Path to the site config document.
    #[arg(long, default_value = "mxcp-site.yml")]
    config: PathBuf,

    /// Profile override (also: MXCP_PROFILE).
    #[arg(long)]
    profile: Option<String>,

    /// Serve the admin surface (also: MXCP_ADMIN_ENABLED).
    #[arg(long)]
    admin: bool,

    /// Log file (stderr only when omitted).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(args.log_file.as_deref(), args.verbose)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    match runtime.block_on(run(args)) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %format!("{:#}", e), "server exited with error");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if let Some(profile) = &args.profile {
        std::env::set_var(mxcp_server::config::env_vars::PROFILE, profile);
    }
    if args.admin {
        std::env::set_var(mxcp_server::config::env_vars::ADMIN_ENABLED, "1");
    }

    let site = SiteConfig::load(&args.config)?;
    let config = ServerConfig::resolve(&site, &args.config)?;
    info!(project = %config.project, profile = %config.profile, "starting mxcp");

    let audit_enabled = config.audit_enabled;
    let audit_path = config.audit_path.clone();
    let retention_days = config.audit_retention_days;
    let admin_enabled = config.admin_enabled;
    let admin_socket = config.admin_socket.clone();

    let startup_config = config.clone();
    let ctx = tokio::task::spawn_blocking(move || {
        ServerContext::initialize(
            startup_config,
            Box::new(EnvConfigProvider),
            HostModuleTable::new(),
            LifecycleHooks::new(),
        )
    })
    .await
    .context("startup task failed")??;

    if audit_enabled {
        let _sweeper = mxcp_audit::retention::spawn_periodic(
            audit_path,
            retention_days,
            std::time::Duration::from_secs(24 * 60 * 60),
        );
    }

    if admin_enabled {
        let admin_ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_ctx, &admin_socket).await {
                warn!(error = %format!("{:#}", e), "admin surface stopped");
            }
        });
    }

    signals::run_until_shutdown(ctx).await
}
