//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all bridge failure modes.
///
/// `Clone` so that a single connection failure can be reported to every
/// exchange it affects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The listener socket could not be bound.
    Listen(String),
    /// The listener failed while serving agent connections.
    Serve(String),
    /// Certificate or key material could not be loaded.
    Tls(String),
    /// A frame could not be sent to or received from the agent.
    Transport(String),
    /// The agent closed its side of the stream.
    EndOfStream,
    /// The caller's deadline expired before the agent answered.
    DeadlineExceeded,
    /// Frame encoding or decoding failure.
    Codec(String),
    /// File-system or socket I/O failure.
    Io(String),
    /// The outcome of an exchange has already been taken by a caller.
    AlreadyConsumed(String),
}

impl AppError {
    /// Whether this error reports an expired caller deadline.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// Whether this error reports a lost agent connection.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Listen(msg) => write!(f, "listen: {msg}"),
            Self::Serve(msg) => write!(f, "serve: {msg}"),
            Self::Tls(msg) => write!(f, "tls: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::EndOfStream => write!(f, "end of stream"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::AlreadyConsumed(msg) => write!(f, "already consumed: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
