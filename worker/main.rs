#![forbid(unsafe_code)]

//! `agent-bridge-worker`: reference agent for `agent-bridge`.
//!
//! Repeatedly invokes the bridge's streaming endpoint and answers every
//! request with the `ping` convention: `ping` gets `Pong`, anything else
//! gets `400 unknown path`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};

use agent_bridge::config::DEFAULT_MAX_FRAME_BYTES;
use agent_bridge::logging::{init_tracing, LogFormat};
use agent_bridge::models::{Reply, WorkUnit};
use agent_bridge::worker::{ping_handler, WorkerClient};
use agent_bridge::{tls, Result};

#[derive(Debug, Parser)]
#[command(
    name = "agent-bridge-worker",
    about = "Reference agent for agent-bridge",
    version,
    long_about = None
)]
struct Cli {
    /// Bridge address (`host:port`).
    #[arg(long, default_value = "127.0.0.1:50051")]
    addr: String,

    /// CA certificate to verify the bridge with; enables TLS.
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Name expected in the bridge certificate.
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Pause between invocations that found no work, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Largest request frame accepted from the bridge, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let mut client = WorkerClient::new(args.addr.clone()).with_max_frame_bytes(args.max_frame_bytes);
    if let Some(ref ca_file) = args.ca_file {
        client = client.with_tls(tls::load_connector(ca_file)?, tls::server_name(&args.server_name)?);
    }

    let poll_interval = Duration::from_millis(args.poll_interval_ms);
    let mut handler = |unit: WorkUnit| async move { answer(&unit) };
    info!(addr = %args.addr, "worker started");

    loop {
        let invocation = client.invoke(&mut handler);
        let served = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            served = invocation => served,
        };

        match served {
            Ok(0) => tokio::time::sleep(poll_interval).await,
            Ok(count) => debug!(count, "batch answered"),
            Err(err) => {
                warn!(%err, "invocation failed, retrying");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    info!("worker stopped");
    Ok(())
}

fn answer(unit: &WorkUnit) -> Reply {
    let reply = ping_handler(unit);
    debug!(path = %unit.path, status = reply.status, "answered");
    reply
}
