use std::time::Duration;

pub const DEFAULT_LISTEN_PORT: u16 = 3000;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Ports dev servers commonly listen on, in probe order.
pub const DEFAULT_CANDIDATE_PORTS: &[u16] = &[5173, 3000, 5174, 3001];
pub const DEFAULT_TARGET_PORT: u16 = 5173;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept (e.g. EMFILE) before trying again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_HANDSHAKE_HEAD_BYTES: usize = 64 * 1024;
pub const MAX_REJECTION_BODY_BYTES: usize = 64 * 1024;
