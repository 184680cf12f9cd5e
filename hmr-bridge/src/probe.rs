//! Port probing - finds the port a dev server is listening on
//!
//! Every candidate is checked concurrently, but results are consumed in
//! candidate order: the first reachable port in the list wins, however fast
//! a later one answered. A check that fails, times out or panics counts as
//! unreachable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmr_bridge_core::{ExecutionContext, TargetEndpoint};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub port: u16,
    pub reachable: bool,
}

/// A bounded-time check of whether something answers on `host:port`.
#[async_trait]
pub trait Reachability: Send + Sync + 'static {
    async fn is_reachable(&self, host: &str, port: u16) -> bool;
}

/// Reachable when a TCP connection is accepted.
pub struct TcpReachability {
    timeout: Duration,
}

impl TcpReachability {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Reachability for TcpReachability {
    async fn is_reachable(&self, host: &str, port: u16) -> bool {
        tokio::time::timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .is_ok_and(|r| r.is_ok())
    }
}

/// Reachable when an HTTP request gets any response, whatever the status.
///
/// Used for named platforms, where the platform router accepts TCP on every
/// port and only an HTTP answer says something is behind it.
pub struct HttpReachability {
    client: reqwest::Client,
}

impl HttpReachability {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Reachability for HttpReachability {
    async fn is_reachable(&self, host: &str, port: u16) -> bool {
        let url = format!("http://{host}:{port}/");
        self.client.get(&url).send().await.is_ok()
    }
}

pub struct PortProbe {
    checker: Arc<dyn Reachability>,
}

impl PortProbe {
    pub fn new(checker: Arc<dyn Reachability>) -> Self {
        Self { checker }
    }

    /// The check appropriate for `context`.
    pub fn for_context(context: &ExecutionContext, timeout: Duration) -> Self {
        if let ExecutionContext::NamedPlatform(_) = context {
            match HttpReachability::new(timeout) {
                Ok(http) => return Self::new(Arc::new(http)),
                Err(e) => {
                    tracing::warn!(error = %e, "http probe unavailable, falling back to tcp");
                }
            }
        }
        Self::new(Arc::new(TcpReachability::new(timeout)))
    }

    /// Probe `candidates` on `host`, stopping at the first reachable port.
    ///
    /// The returned results are in candidate order and end with the selected
    /// port, if any.
    pub async fn probe(&self, host: &str, candidates: &[u16]) -> Vec<ProbeResult> {
        let checks: Vec<(u16, JoinHandle<bool>)> = candidates
            .iter()
            .map(|&port| {
                let checker = self.checker.clone();
                let host = host.to_string();
                (
                    port,
                    tokio::spawn(async move { checker.is_reachable(&host, port).await }),
                )
            })
            .collect();

        let mut results = Vec::with_capacity(checks.len());
        let mut checks = checks.into_iter();
        while let Some((port, check)) = checks.next() {
            let reachable = check.await.unwrap_or(false);
            tracing::debug!(host, port, reachable, "probed port");
            results.push(ProbeResult { port, reachable });
            if reachable {
                for (_, rest) in checks.by_ref() {
                    rest.abort();
                }
                break;
            }
        }
        results
    }

    /// Resolve the dev server endpoint for `context`.
    ///
    /// Falls back to `default_port` when no candidate answers; never fails.
    pub async fn find_target(
        &self,
        candidates: &[u16],
        context: &ExecutionContext,
        default_port: u16,
    ) -> TargetEndpoint {
        let host = context.upstream_host();
        let results = self.probe(&host, candidates).await;
        match results.iter().find(|r| r.reachable) {
            Some(hit) => {
                tracing::info!(host = %host, port = hit.port, "dev server detected");
                TargetEndpoint::new(host, hit.port)
            }
            None => {
                tracing::warn!(
                    host = %host,
                    candidates = ?candidates,
                    default_port,
                    "no dev server answered on any candidate port, using default"
                );
                TargetEndpoint::new(host, default_port)
            }
        }
    }
}

/// Candidate list actually probed: de-duplicated, in order, and without the
/// bridge's own port when it shares the network namespace with the target.
pub fn effective_candidates(
    candidates: &[u16],
    context: &ExecutionContext,
    listen_port: u16,
) -> Vec<u16> {
    let mut out: Vec<u16> = Vec::with_capacity(candidates.len());
    for &port in candidates {
        if !context.is_isolated() && port == listen_port {
            continue;
        }
        if !out.contains(&port) {
            out.push(port);
        }
    }
    out
}
