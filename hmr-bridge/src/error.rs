use std::net::SocketAddr;

use hmr_bridge_core::{TargetEndpoint, TargetParseError};
use thiserror::Error;

/// Process-level errors. Only these end the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge could not bind on {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    #[error("invalid target: {0}")]
    InvalidTarget(#[from] TargetParseError),

    #[error("target {0} is the bridge itself (listening on port {1})")]
    SelfTarget(TargetEndpoint, u16),

    #[error("failed to serialize environment: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors scoped to a single proxied connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream {0} unreachable: {1}")]
    Connect(String, std::io::Error),

    #[error("upstream {0} did not accept a connection in time")]
    ConnectTimeout(String),

    #[error("malformed upgrade request: {0}")]
    MalformedUpgrade(&'static str),

    #[error("invalid upstream handshake response: {0}")]
    UpstreamHandshake(String),

    #[error("upstream handshake timed out")]
    HandshakeTimeout,

    #[error("invalid upstream host '{0}'")]
    InvalidUpstreamHost(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
