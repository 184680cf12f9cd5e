//! Inbound listener and per-connection HTTP/1.1 service

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::bridge::Bridge;
use crate::defaults::ACCEPT_ERROR_BACKOFF;
use crate::error::BridgeError;
use crate::proxy;

/// Bind the inbound listener. Failure here is the bridge's only fatal error.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, BridgeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::Bind(addr, e))
}

/// Accept connections forever, one task per connection.
///
/// Connections are independent: a failing peer or upstream never affects the
/// listener or other connections.
pub async fn serve(listener: TcpListener, bridge: Arc<Bridge>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let bridge = bridge.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| proxy::handle(req, bridge.clone()));
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await
            {
                tracing::debug!(peer = %peer, error = %e, "connection ended with error");
            }
        });
    }
}
