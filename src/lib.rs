#![forbid(unsafe_code)]

//! Bridges many blocking callers to a single, intermittently connected
//! remote agent over a bidirectional stream.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod exchange;
pub mod health;
pub mod logging;
pub mod models;
pub mod registry;
pub mod server;
pub mod stream;
pub mod tls;
pub mod worker;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
pub use server::{BridgeClient, BridgeServer, ServerState};
