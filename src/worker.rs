//! Agent-side helper for servicing bridge invocations.
//!
//! A worker connects to the bridge, answers every request frame in order,
//! and returns once the bridge closes the connection at the end of the
//! batch. Reconnecting for the next batch is the caller's decision.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::models::{Reply, WorkUnit};
use crate::stream::codec::FrameCodec;
use crate::stream::frames::{RequestFrame, ResponseFrame};
use crate::{AppError, Result};

/// Path answered by [`ping_handler`].
pub const PING_PATH: &str = "ping";

/// Answer `ping` with `Pong`; reject every other path with status 400.
#[must_use]
pub fn ping_handler(unit: &WorkUnit) -> Reply {
    if unit.path == PING_PATH {
        Reply::new(200, b"Pong".to_vec())
    } else {
        Reply::new(400, b"unknown path".to_vec())
    }
}

/// Answer request frames on `io` until the bridge closes the stream.
///
/// Every request gets exactly one response, in order. A frame that cannot be
/// decoded is answered with status 400 so the positional pairing holds.
///
/// Returns the number of requests answered.
///
/// # Errors
///
/// Returns `AppError::Transport` if a response cannot be written.
pub async fn serve_invocation<T, H, Fut>(
    io: T,
    max_frame_bytes: usize,
    handler: &mut H,
) -> Result<usize>
where
    T: AsyncRead + AsyncWrite + Unpin,
    H: FnMut(WorkUnit) -> Fut,
    Fut: Future<Output = Reply>,
{
    let mut framed = Framed::new(io, FrameCodec::<RequestFrame>::with_max_length(max_frame_bytes));
    let mut served = 0;

    while let Some(item) = framed.next().await {
        let reply = match item {
            Ok(Ok(frame)) => {
                let unit = WorkUnit::from(frame);
                debug!(path = %unit.path, "handling bridge request");
                handler(unit).await
            }
            Ok(Err(err)) => {
                warn!(%err, "undecodable request frame");
                Reply::new(400, err.to_string().into_bytes())
            }
            Err(err) => {
                warn!(%err, "bridge stream failed");
                break;
            }
        };

        framed
            .send(ResponseFrame::from(reply))
            .await
            .map_err(|err| AppError::Transport(format!("send failed: {err}")))?;
        served += 1;
    }

    Ok(served)
}

/// Connection settings for a worker.
#[derive(Clone)]
pub struct WorkerClient {
    addr: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    max_frame_bytes: usize,
}

impl WorkerClient {
    /// Plaintext worker connecting to `addr` (`host:port`).
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            tls: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Connect over TLS, verifying the bridge certificate against `server_name`.
    #[must_use]
    pub fn with_tls(mut self, connector: TlsConnector, server_name: ServerName<'static>) -> Self {
        self.tls = Some((connector, server_name));
        self
    }

    /// Override the inbound frame limit.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Open one invocation and answer its batch with `handler`.
    ///
    /// # Errors
    ///
    /// - `AppError::Io` if the connection cannot be opened.
    /// - `AppError::Tls` if the TLS handshake fails.
    /// - `AppError::Transport` if a response cannot be written.
    pub async fn invoke<H, Fut>(&self, handler: &mut H) -> Result<usize>
    where
        H: FnMut(WorkUnit) -> Fut,
        Fut: Future<Output = Reply>,
    {
        let socket = TcpStream::connect(self.addr.as_str())
            .await
            .map_err(|err| AppError::Io(format!("cannot connect to {}: {err}", self.addr)))?;

        match &self.tls {
            Some((connector, server_name)) => {
                let stream = connector
                    .connect(server_name.clone(), socket)
                    .await
                    .map_err(|err| AppError::Tls(format!("handshake failed: {err}")))?;
                serve_invocation(stream, self.max_frame_bytes, handler).await
            }
            None => serve_invocation(socket, self.max_frame_bytes, handler).await,
        }
    }
}
