//! Dev-server bridge
//!
//! Listens on a local port and forwards HTTP requests and WebSocket upgrades
//! to a dev server running on the host, wherever the bridge itself runs.

pub mod bridge;
pub mod defaults;
pub mod error;
pub mod probe;
pub mod proxy;
pub mod server;
pub mod tunnel;

pub use bridge::{Bridge, Route, ensure_not_self};
pub use error::{BridgeError, ProxyError};
pub use probe::{PortProbe, ProbeResult, Reachability, effective_candidates};
pub use tunnel::TunnelState;
