//! Bridge configuration parsing and validation.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Port the bridge listens on when none is configured.
pub const DEFAULT_PORT: u16 = 50051;

/// Maximum NDJSON frame length accepted from the agent: 1 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_reply_timeout_seconds() -> u64 {
    30
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_health_port() -> u16 {
    8090
}

/// Liveness endpoint settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Whether the HTTP health service is started.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HTTP port for `/health` and `/status`.
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_health_port(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Interface the agent listener binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port the agent listener binds to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// PEM certificate chain; must be paired with `key_file`.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    /// PEM private key; must be paired with `cert_file`.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Upper bound on a single inbound frame.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Longest wait for the agent to take a request or answer it before the
    /// connection is treated as dead.
    #[serde(default = "default_reply_timeout_seconds")]
    pub reply_timeout_seconds: u64,
    /// How long shutdown waits for an in-flight batch before aborting it.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Health endpoint settings.
    #[serde(default)]
    pub health: HealthConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            cert_file: None,
            key_file: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            reply_timeout_seconds: default_reply_timeout_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            health: HealthConfig::default(),
        }
    }
}

/// Transport encryption selected by the certificate/key pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Neither certificate nor key configured.
    Plaintext,
    /// Both certificate and key configured.
    Tls {
        /// PEM certificate chain path.
        cert_file: PathBuf,
        /// PEM private key path.
        key_file: PathBuf,
    },
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the transport security mode from the certificate/key pair.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when only one of the two files is set.
    pub fn transport_security(&self) -> Result<TransportSecurity> {
        match (non_empty(self.cert_file.as_ref()), non_empty(self.key_file.as_ref())) {
            (None, None) => {
                info!("no cert/key configured, running without transport security");
                Ok(TransportSecurity::Plaintext)
            }
            (Some(cert_file), Some(key_file)) => Ok(TransportSecurity::Tls {
                cert_file: cert_file.clone(),
                key_file: key_file.clone(),
            }),
            _ => Err(AppError::Config("missing cert or key file".into())),
        }
    }

    /// Socket address the agent listener binds to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `host:port` is not a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse()
            .map_err(|err| AppError::Config(format!("invalid bind address '{raw}': {err}")))
    }

    /// Bound on one send or receive with the agent.
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_seconds)
    }

    /// Grace period for the in-flight batch at shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "max_frame_bytes must be greater than zero".into(),
            ));
        }

        if self.reply_timeout_seconds == 0 {
            return Err(AppError::Config(
                "reply_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.port == 0 {
            warn!("port 0 configured, the OS will pick an ephemeral port");
        }

        self.bind_addr()?;
        self.transport_security()?;
        Ok(())
    }
}

/// Treat an empty path the same as an absent one.
fn non_empty(path: Option<&PathBuf>) -> Option<&PathBuf> {
    path.filter(|p| !p.as_os_str().is_empty())
}
