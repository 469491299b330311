//! HTTP liveness and status endpoint.
//!
//! `GET /health` answers `OK` while the process is up; `GET /status`
//! reports the server state and how many requests wait for the agent.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::registry::Registry;
use crate::server::ServerState;
use crate::{AppError, Result};

/// State shared with the health handlers.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Queue whose length is reported as `pending`.
    pub registry: Arc<Registry>,
    /// Bridge lifecycle state.
    pub server_state: watch::Receiver<ServerState>,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    /// Bridge lifecycle state.
    pub state: ServerState,
    /// Requests queued for the next agent invocation.
    pub pending: usize,
}

async fn health() -> &'static str {
    "OK"
}

async fn status(State(state): State<HealthState>) -> Json<StatusBody> {
    Json(StatusBody {
        state: *state.server_state.borrow(),
        pending: state.registry.len(),
    })
}

/// Router serving `/health` and `/status`.
#[must_use]
pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve the health endpoint on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Serve` if the HTTP server fails.
pub async fn serve_health(
    listener: TcpListener,
    state: HealthState,
    ct: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "health endpoint listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Serve(format!("health server error: {err}")))?;

    info!("health endpoint shut down");
    Ok(())
}
