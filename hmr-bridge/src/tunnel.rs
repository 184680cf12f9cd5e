//! WebSocket upgrade passthrough
//!
//! A tunnel moves through three states:
//!
//! - **Handshaking**: the client's upgrade request is replayed byte for byte
//!   over a fresh upstream socket, with only `Host` replaced, and the
//!   upstream's response head is read back raw.
//! - **Tunneling**: both sockets are paired and bytes are copied in each
//!   direction without looking at WebSocket frames.
//! - **Closed**: either side closing or failing closes the other.
//!
//! Frames are never parsed: HMR payloads ride on top of WebSocket framing and
//! must arrive exactly as the dev server wrote them.

use std::time::Duration;

use bytes::Bytes;
use hmr_bridge_core::TargetEndpoint;
use hyper::body::Incoming;
use hyper::header::{
    CONNECTION, CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_VERSION, TRANSFER_ENCODING, UPGRADE,
};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::bridge::Bridge;
use crate::defaults::{
    HANDSHAKE_TIMEOUT, MAX_HANDSHAKE_HEAD_BYTES, MAX_REJECTION_BODY_BYTES,
    UPSTREAM_CONNECT_TIMEOUT,
};
use crate::error::{ProxyError, Result};
use crate::proxy::{BoxBody, empty_body, full_body, text_response};

const MAX_RESPONSE_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Handshaking,
    Tunneling,
    Closed,
}

pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    has_token(headers, &UPGRADE, "websocket")
}

/// Check that an upgrade request carries what a replay needs.
pub fn validate_upgrade(method: &Method, headers: &HeaderMap) -> Result<()> {
    if method != Method::GET {
        return Err(ProxyError::MalformedUpgrade("websocket upgrade must use GET"));
    }
    if !has_token(headers, &CONNECTION, "upgrade") {
        return Err(ProxyError::MalformedUpgrade("missing Connection: upgrade"));
    }
    if !headers.contains_key(SEC_WEBSOCKET_KEY) {
        return Err(ProxyError::MalformedUpgrade("missing Sec-WebSocket-Key"));
    }
    if !headers.contains_key(SEC_WEBSOCKET_VERSION) {
        return Err(ProxyError::MalformedUpgrade("missing Sec-WebSocket-Version"));
    }
    Ok(())
}

fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Request line and headers as sent upstream. `Host` keeps its position but
/// names the upstream; every other header is copied as received.
pub fn replay_head(
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    upstream: &TargetEndpoint,
) -> Vec<u8> {
    let host = upstream.authority();
    let mut head = Vec::with_capacity(1024);
    head.extend_from_slice(method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(path_and_query.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");

    let mut wrote_host = false;
    for (name, value) in headers {
        if name == HOST {
            if !wrote_host {
                push_host(&mut head, &host);
                wrote_host = true;
            }
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if !wrote_host {
        push_host(&mut head, &host);
    }
    head.extend_from_slice(b"\r\n");
    head
}

fn push_host(head: &mut Vec<u8>, host: &str) {
    head.extend_from_slice(b"Host: ");
    head.extend_from_slice(host.as_bytes());
    head.extend_from_slice(b"\r\n");
}

/// Upstream response to a replayed upgrade request.
#[derive(Debug)]
pub struct HandshakeReply {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Bytes received after the response head.
    pub leftover: Vec<u8>,
}

impl HandshakeReply {
    fn content_length(&self) -> Option<usize> {
        self.headers
            .iter()
            .find(|(n, _)| n == CONTENT_LENGTH)
            .and_then(|(_, v)| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    fn is_chunked(&self) -> bool {
        self.headers.iter().any(|(n, _)| n == TRANSFER_ENCODING)
    }
}

/// Parse a raw HTTP/1.x response head. `Ok(None)` means more bytes are needed.
pub fn parse_response_head(buf: &[u8]) -> Result<Option<HandshakeReply>> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut resp = httparse::Response::new(&mut storage);
    let len = match resp.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProxyError::UpstreamHandshake(e.to_string())),
    };

    let code = resp
        .code
        .ok_or_else(|| ProxyError::UpstreamHandshake("missing status code".to_string()))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| ProxyError::UpstreamHandshake(format!("invalid status code {code}")))?;

    let mut headers = Vec::with_capacity(resp.headers.len());
    for h in resp.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| ProxyError::UpstreamHandshake(format!("invalid header name {}", h.name)))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| ProxyError::UpstreamHandshake(format!("invalid value for {}", h.name)))?;
        headers.push((name, value));
    }

    Ok(Some(HandshakeReply {
        status,
        headers,
        leftover: buf[len..].to_vec(),
    }))
}

async fn read_response_head(upstream: &mut TcpStream) -> Result<HandshakeReply> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = upstream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ProxyError::UpstreamHandshake(
                "upstream closed before answering the upgrade".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(reply) = parse_response_head(&buf)? {
            return Ok(reply);
        }
        if buf.len() > MAX_HANDSHAKE_HEAD_BYTES {
            return Err(ProxyError::UpstreamHandshake(
                "upstream response head too large".to_string(),
            ));
        }
    }
}

async fn connect(upstream: &TargetEndpoint) -> Result<TcpStream> {
    let addr = upstream.authority();
    match tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect(addr.as_str())).await {
        Err(_) => Err(ProxyError::ConnectTimeout(addr)),
        Ok(Err(e)) => Err(ProxyError::Connect(addr, e)),
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
    }
}

/// Run the upgrade handshake for `req` and, on `101`, start the tunnel.
///
/// Returns the response for the inbound client. An `Err` means the upstream
/// could not be reached and the inbound connection should be dropped.
pub async fn handshake(req: Request<Incoming>, bridge: &Bridge) -> Result<Response<BoxBody>> {
    if let Err(e) = validate_upgrade(req.method(), req.headers()) {
        tracing::warn!(error = %e, path = %req.uri(), "rejecting websocket upgrade");
        return Ok(text_response(StatusCode::BAD_REQUEST, &e.to_string()));
    }

    let route = bridge.route(req.uri());
    tracing::debug!(
        state = ?TunnelState::Handshaking,
        path = %route.path_and_query,
        upstream = %route.upstream,
        "websocket upgrade"
    );

    let head = replay_head(
        req.method(),
        &route.path_and_query,
        req.headers(),
        &route.upstream,
    );
    let (reply, upstream) = match exchange_head(&route.upstream, &head).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, upstream = %route.upstream, "websocket handshake failed");
            return Err(e);
        }
    };

    if reply.status != StatusCode::SWITCHING_PROTOCOLS {
        tracing::warn!(status = %reply.status, upstream = %route.upstream, "upstream declined websocket upgrade");
        return relay_rejection(reply, upstream).await;
    }

    let mut response = Response::new(empty_body());
    *response.status_mut() = reply.status;
    for (name, value) in reply.headers {
        response.headers_mut().append(name, value);
    }

    let leftover = reply.leftover;
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => pipe(TokioIo::new(upgraded), upstream, leftover).await,
            Err(e) => tracing::warn!(error = %e, "inbound upgrade failed"),
        }
    });

    Ok(response)
}

async fn exchange_head(
    upstream: &TargetEndpoint,
    head: &[u8],
) -> Result<(HandshakeReply, TcpStream)> {
    let mut stream = connect(upstream).await?;
    stream.write_all(head).await?;
    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_response_head(&mut stream))
        .await
        .map_err(|_| ProxyError::HandshakeTimeout)??;
    Ok((reply, stream))
}

/// Pass a non-101 answer back to the client; no tunnel is entered.
async fn relay_rejection(
    reply: HandshakeReply,
    mut upstream: TcpStream,
) -> Result<Response<BoxBody>> {
    let chunked = reply.is_chunked();
    let limit = reply
        .content_length()
        .unwrap_or(MAX_REJECTION_BODY_BYTES)
        .min(MAX_REJECTION_BODY_BYTES);

    let mut body = if chunked { Vec::new() } else { reply.leftover };
    if !chunked {
        let read_rest = async {
            let mut chunk = [0u8; 4096];
            while body.len() < limit {
                let n = upstream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&chunk[..n]);
            }
            Ok::<_, std::io::Error>(())
        };
        let outcome = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_rest).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, read = body.len(), "rejection body read failed")
            }
            Err(_) => tracing::debug!(read = body.len(), "rejection body read timed out"),
        }
        if body.len() > limit {
            tracing::debug!(received = body.len(), limit, "rejection body truncated");
            body.truncate(limit);
        }
    }

    let mut response = Response::new(full_body(Bytes::from(body)));
    *response.status_mut() = reply.status;
    for (name, value) in reply.headers {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        response.headers_mut().append(name, value);
    }
    Ok(response)
}

/// Copy bytes both ways until either side stops, then close both.
pub async fn pipe<I>(inbound: I, upstream: TcpStream, leftover: Vec<u8>)
where
    I: AsyncRead + AsyncWrite + Unpin,
{
    let started = std::time::Instant::now();
    let (mut in_r, mut in_w) = tokio::io::split(inbound);
    let (mut up_r, mut up_w) = upstream.into_split();

    if !leftover.is_empty()
        && let Err(e) = in_w.write_all(&leftover).await
    {
        tracing::debug!(error = %e, state = ?TunnelState::Closed, "client gone before tunnel start");
        return;
    }
    tracing::debug!(state = ?TunnelState::Tunneling, "websocket tunnel established");

    let client_to_upstream = async {
        let r = tokio::io::copy(&mut in_r, &mut up_w).await;
        let _ = up_w.shutdown().await;
        r
    };
    let upstream_to_client = async {
        let r = tokio::io::copy(&mut up_r, &mut in_w).await;
        let _ = in_w.shutdown().await;
        r
    };

    let (closed_by, outcome) = tokio::select! {
        r = client_to_upstream => ("client", r),
        r = upstream_to_client => ("upstream", r),
    };
    log_close(closed_by, outcome, started.elapsed());
}

fn log_close(closed_by: &str, outcome: std::io::Result<u64>, lifetime: Duration) {
    match outcome {
        Ok(bytes) => tracing::debug!(
            state = ?TunnelState::Closed,
            closed_by,
            bytes,
            lifetime_ms = lifetime.as_millis() as u64,
            "websocket tunnel closed"
        ),
        Err(e) => tracing::debug!(
            state = ?TunnelState::Closed,
            closed_by,
            error = %e,
            lifetime_ms = lifetime.as_millis() as u64,
            "websocket tunnel closed with error"
        ),
    }
}
