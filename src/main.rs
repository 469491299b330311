#![forbid(unsafe_code)]

//! `agent-bridge`: bridge server binary.
//!
//! Loads configuration, starts the agent listener and health endpoint, and
//! stops gracefully on Ctrl-C or SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use agent_bridge::logging::{init_tracing, LogFormat};
use agent_bridge::{AppError, BridgeConfig, BridgeServer, Result};

#[derive(Debug, Parser)]
#[command(name = "agent-bridge", about = "Agent stream bridge server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the listener host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listener port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!(version = env!("CARGO_PKG_VERSION"), "agent-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
        .inspect_err(|err| error!(%err, "agent-bridge terminated"))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::load_from_path(path)?,
        None => {
            info!("no config file given, using defaults");
            BridgeConfig::default()
        }
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let server = BridgeServer::new(config);
    let config = server.config();
    info!(
        host = %config.host,
        port = config.port,
        reply_timeout_seconds = config.reply_timeout_seconds,
        health = config.health.enabled,
        "configuration loaded"
    );
    server.run(shutdown_signal()).await?;
    info!("agent-bridge shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}
