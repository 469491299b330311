//! Bridge server: listener lifecycle and the producer-facing call.
//!
//! ## Lifecycle
//!
//! ```text
//! Stopped ──listen()──▶ Listening ──shutdown──▶ Draining ──▶ Stopped
//! ```
//!
//! Every accepted connection is one agent invocation of the streaming
//! endpoint: the registry is drained once, the batch is dispatched, and the
//! connection is closed. Only one invocation runs at a time; a connection
//! arriving while another is active is closed without touching the queue.
//!
//! An agent that stops answering without closing the connection is dropped
//! after the configured reply timeout, which releases the single-agent slot.
//! Shutdown waits for the in-flight batch for a grace period, then aborts it.
//!
//! Exchanges still queued at shutdown are left for their callers' deadlines.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{BridgeConfig, TransportSecurity};
use crate::coordinator::{self, DispatchPolicy};
use crate::exchange::Exchange;
use crate::health::{self, HealthState};
use crate::models::{Reply, WorkUnit};
use crate::registry::Registry;
use crate::stream::FramedAgentStream;
use crate::tls;
use crate::{AppError, Result};

/// Observable lifecycle state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Not accepting agent connections.
    Stopped,
    /// Accepting agent connections.
    Listening,
    /// Shutdown requested; waiting for the in-flight batch.
    Draining,
}

/// Cheap handle for callers that only submit work.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    registry: Arc<Registry>,
}

impl BridgeClient {
    /// Create a client submitting into `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Queue a request for the agent and block until its reply, a failure,
    /// or `timeout`.
    ///
    /// # Errors
    ///
    /// - [`AppError::DeadlineExceeded`] if `timeout` elapses first.
    /// - [`AppError::EndOfStream`] if the agent hung up before the request
    ///   was sent.
    /// - [`AppError::Transport`] for any other delivery failure.
    pub async fn wait_for_result(
        &self,
        path: impl Into<String>,
        body: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Reply> {
        let exchange = Arc::new(Exchange::new(WorkUnit::new(path, body)));
        self.registry.enqueue(Arc::clone(&exchange));

        debug!(exchange_id = %exchange.id(), "awaiting response from agent");
        match exchange.await_outcome(timeout).await {
            Ok(reply) => {
                debug!(exchange_id = %exchange.id(), status = reply.status, "agent response received");
                Ok(reply)
            }
            Err(err) => {
                debug!(exchange_id = %exchange.id(), %err, "request failed");
                Err(err)
            }
        }
    }
}

/// Owns the registry and serves the agent-facing endpoint.
#[derive(Debug)]
pub struct BridgeServer {
    config: Arc<BridgeConfig>,
    registry: Arc<Registry>,
    state: watch::Sender<ServerState>,
    agent_gate: Arc<Semaphore>,
}

impl BridgeServer {
    /// Create a stopped server with an empty registry.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_registry(config, Arc::new(Registry::new()))
    }

    /// Create a stopped server around an existing registry.
    #[must_use]
    pub fn with_registry(config: BridgeConfig, registry: Arc<Registry>) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        Self {
            config: Arc::new(config),
            registry,
            state,
            agent_gate: Arc::new(Semaphore::new(1)),
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The queue of undispatched exchanges.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle for submitting work from other tasks.
    #[must_use]
    pub fn client(&self) -> BridgeClient {
        BridgeClient::new(Arc::clone(&self.registry))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// See [`BridgeClient::wait_for_result`].
    ///
    /// # Errors
    ///
    /// As for [`BridgeClient::wait_for_result`].
    pub async fn wait_for_result(
        &self,
        path: impl Into<String>,
        body: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Reply> {
        self.client().wait_for_result(path, body, timeout).await
    }

    /// Validate transport security and load TLS material if configured.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` when only one of certificate and key is set.
    /// - `AppError::Tls` when the configured files cannot be loaded.
    pub fn configure(&self) -> Result<Option<TlsAcceptor>> {
        match self.config.transport_security()? {
            TransportSecurity::Plaintext => Ok(None),
            TransportSecurity::Tls {
                cert_file,
                key_file,
            } => tls::load_acceptor(&cert_file, &key_file).map(Some),
        }
    }

    /// Bind the agent listener at the configured address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Listen` if the address is invalid or cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self
            .config
            .bind_addr()
            .map_err(|err| AppError::Listen(err.to_string()))?;
        TcpListener::bind(addr)
            .await
            .map_err(|err| AppError::Listen(format!("failed to listen on {addr}: {err}")))
    }

    /// Bind and serve agent invocations until `ct` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Listen` or `AppError::Serve`; both are fatal.
    pub async fn listen(&self, tls: Option<TlsAcceptor>, ct: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, tls, ct).await
    }

    /// Serve agent invocations from `listener` until `ct` is cancelled, then
    /// wait for the in-flight invocation to finish.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Serve` if accepting connections fails.
    pub async fn serve(
        &self,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
        ct: CancellationToken,
    ) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, tls = tls.is_some(), "listening for agent connections");
        }
        self.state.send_replace(ServerState::Listening);

        let tracker = TaskTracker::new();
        let policy = DispatchPolicy::new(self.config.reply_timeout());
        let outcome = loop {
            tokio::select! {
                biased;

                () = ct.cancelled() => break Ok(()),

                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let invocation = AgentInvocation {
                            registry: Arc::clone(&self.registry),
                            gate: Arc::clone(&self.agent_gate),
                            tls: tls.clone(),
                            max_frame_bytes: self.config.max_frame_bytes,
                            policy: policy.clone(),
                        };
                        tracker.spawn(
                            invocation
                                .run(socket, peer)
                                .instrument(info_span!("agent_invocation", %peer)),
                        );
                    }
                    Err(err) => {
                        error!(%err, "failed to accept agent connection");
                        break Err(AppError::Serve(format!("failed to accept: {err}")));
                    }
                },
            }
        };

        self.state.send_replace(ServerState::Draining);
        drop(listener);
        tracker.close();
        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(?grace, "in-flight batch outlived the shutdown grace period, aborting it");
            policy.abort.cancel();
            tracker.wait().await;
        }
        self.state.send_replace(ServerState::Stopped);
        info!("agent listener stopped");

        outcome
    }

    /// Run until `shutdown` resolves, then stop gracefully.
    ///
    /// Starts the health endpoint when enabled. A pending caller whose
    /// request is still queued at shutdown is left to its own deadline.
    ///
    /// # Errors
    ///
    /// Returns configuration, listen, or serve failures; each is fatal.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let tls = self.configure()?;
        let ct = CancellationToken::new();
        let health_handle = self.spawn_health(ct.clone()).await;

        let listen = self.listen(tls, ct.clone());
        tokio::pin!(listen);

        let early = tokio::select! {
            result = &mut listen => Some(result),
            () = shutdown => {
                info!("shutdown requested, stopping gracefully");
                None
            }
        };
        ct.cancel();

        let result = match early {
            Some(result) => result,
            None => listen.await,
        };

        if let Some(handle) = health_handle {
            if let Err(err) = handle.await {
                warn!(%err, "health task panicked");
            }
        }

        let abandoned = self.registry.len();
        if abandoned > 0 {
            warn!(abandoned, "requests still queued at shutdown will time out");
        }
        if result.is_ok() {
            info!("stopped gracefully");
        }
        result
    }

    async fn spawn_health(&self, ct: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.health.enabled {
            return None;
        }

        let addr = format!("{}:{}", self.config.host, self.config.health.port);
        let listener = match TcpListener::bind(addr.as_str()).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(%addr, %err, "health endpoint failed to bind");
                return None;
            }
        };

        let state = HealthState {
            registry: Arc::clone(&self.registry),
            server_state: self.subscribe_state(),
        };
        Some(tokio::spawn(async move {
            if let Err(err) = health::serve_health(listener, state, ct).await {
                error!(%err, "health endpoint failed");
            }
        }))
    }
}

/// Everything one accepted connection needs, detached from the server.
struct AgentInvocation {
    registry: Arc<Registry>,
    gate: Arc<Semaphore>,
    tls: Option<TlsAcceptor>,
    max_frame_bytes: usize,
    policy: DispatchPolicy,
}

impl AgentInvocation {
    async fn run(self, socket: TcpStream, peer: SocketAddr) {
        debug!("agent connected");
        let Some(acceptor) = self.tls.clone() else {
            self.dispatch(socket).await;
            return;
        };

        let handshake = self.policy.reply_timeout;
        tokio::select! {
            () = self.policy.abort.cancelled() => debug!("tls handshake abandoned at shutdown"),
            accepted = tokio::time::timeout(handshake, acceptor.accept(socket)) => match accepted {
                Ok(Ok(stream)) => self.dispatch(stream).await,
                Ok(Err(err)) => warn!(%peer, %err, "tls handshake with agent failed"),
                Err(_) => warn!(%peer, ?handshake, "tls handshake with agent timed out"),
            },
        }
    }

    async fn dispatch<T>(&self, io: T)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Ok(_permit) = Arc::clone(&self.gate).try_acquire_owned() else {
            warn!("another agent invocation is active, rejecting connection");
            return;
        };

        let mut stream = FramedAgentStream::new(io, self.max_frame_bytes);
        let report = coordinator::run_invocation(&self.registry, &mut stream, &self.policy).await;
        if report.batch_size > 0 {
            info!(
                batch_size = report.batch_size,
                delivered = report.delivered,
                failed = report.failed,
                cut_short = report.cut_short,
                discarded = report.discarded,
                "agent invocation complete"
            );
        }

        match tokio::time::timeout(self.policy.reply_timeout, stream.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(%err, "agent stream already closed"),
            Err(_) => debug!("agent did not take the close, dropping connection"),
        }
    }
}
