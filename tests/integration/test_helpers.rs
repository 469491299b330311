//! Shared helpers for bridge integration tests.
//!
//! Servers bind `127.0.0.1:0` so tests never collide on ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use agent_bridge::config::{BridgeConfig, HealthConfig};
use agent_bridge::registry::Registry;
use agent_bridge::stream::codec::FrameCodec;
use agent_bridge::stream::frames::RequestFrame;
use agent_bridge::{BridgeServer, Result};

/// Loopback configuration on an ephemeral port with health disabled.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".into(),
        port: 0,
        health: HealthConfig {
            enabled: false,
            port: 0,
        },
        ..BridgeConfig::default()
    }
}

/// A running bridge listener.
pub struct TestBridge {
    pub server: Arc<BridgeServer>,
    pub addr: SocketAddr,
    pub ct: CancellationToken,
    pub handle: JoinHandle<Result<()>>,
}

impl TestBridge {
    pub fn registry(&self) -> &Arc<Registry> {
        self.server.registry()
    }

    /// Cancel the listener and wait for it to drain.
    pub async fn stop(self) -> Result<()> {
        self.ct.cancel();
        self.handle.await.expect("serve task")
    }
}

/// Start a plaintext bridge on an ephemeral loopback port.
pub async fn spawn_bridge() -> TestBridge {
    spawn_bridge_with(test_config()).await
}

/// Start a bridge from `config`, with TLS when it names a cert and key.
pub async fn spawn_bridge_with(config: BridgeConfig) -> TestBridge {
    let server = Arc::new(BridgeServer::new(config));
    let tls = server.configure().expect("valid transport security");
    let listener = server.bind().await.expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    let ct = CancellationToken::new();

    let handle = {
        let server = Arc::clone(&server);
        let ct = ct.clone();
        tokio::spawn(async move { server.serve(listener, tls, ct).await })
    };

    TestBridge {
        server,
        addr,
        ct,
        handle,
    }
}

/// Wait until `registry` holds at least `count` exchanges.
pub async fn wait_for_queued(registry: &Registry, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("exchanges were not queued in time");
}

/// Connect a hand-driven agent speaking raw frames.
pub async fn raw_agent(addr: SocketAddr) -> Framed<TcpStream, FrameCodec<RequestFrame>> {
    let socket = TcpStream::connect(addr).await.expect("connect to bridge");
    Framed::new(socket, FrameCodec::new())
}
