#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hmr_bridge::{Bridge, server};
use hmr_bridge_core::{ExecutionContext, TargetEndpoint};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Start an in-process bridge on an ephemeral loopback port.
pub async fn start_bridge(context: ExecutionContext, target: TargetEndpoint) -> SocketAddr {
    let listener = server::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind bridge");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, Arc::new(Bridge::new(context, target))));
    addr
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

/// A request as seen by a scripted upstream.
#[derive(Debug, Clone)]
pub struct Captured {
    pub head: String,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or("")
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.trim()
                .eq_ignore_ascii_case(name)
                .then(|| v.trim().to_string())
        })
    }

    pub fn header_count(&self, name: &str) -> usize {
        self.head
            .lines()
            .skip(1)
            .filter(|line| {
                line.split_once(':')
                    .is_some_and(|(n, _)| n.trim().eq_ignore_ascii_case(name))
            })
            .count()
    }
}

/// Read an HTTP head (through the blank line) plus whatever followed it.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find_head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            return (head, buf[end + 4..].to_vec());
        }
        let n = stream.read(&mut chunk).await.expect("read head");
        assert!(n > 0, "peer closed before a complete head");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(head: &str) -> Option<usize> {
    head.lines().skip(1).find_map(|line| {
        let (n, v) = line.split_once(':')?;
        if n.trim().eq_ignore_ascii_case("content-length") {
            v.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Read a request: head plus a `Content-Length` body, if any.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Captured {
    read_message(stream, false).await
}

/// Read a response: head plus a `Content-Length` body, or everything until
/// the peer closes.
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> Captured {
    read_message(stream, true).await
}

async fn read_message<S: AsyncRead + Unpin>(stream: &mut S, until_close: bool) -> Captured {
    let (head, mut body) = read_head(stream).await;
    match content_length(&head) {
        Some(len) => {
            let mut chunk = [0u8; 8192];
            while body.len() < len {
                let n = stream.read(&mut chunk).await.expect("read body");
                assert!(n > 0, "peer closed mid-body");
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(len);
        }
        None if until_close => {
            stream.read_to_end(&mut body).await.expect("read body");
        }
        None => {}
    }
    Captured { head, body }
}

/// Send `raw` on a fresh connection and read one response.
pub async fn send_raw(addr: SocketAddr, raw: &[u8]) -> Captured {
    let mut stream = TcpStream::connect(addr).await.expect("connect bridge");
    stream.write_all(raw).await.expect("write request");
    tokio::time::timeout(IO_TIMEOUT, read_response(&mut stream))
        .await
        .expect("response in time")
}

pub fn status_of(resp: &Captured) -> u16 {
    resp.request_line()
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Upstream that answers every request with `response` and reports what it
/// received. The answer is sent as-is, then the connection is closed.
pub async fn http_upstream(response: Vec<u8>) -> (u16, mpsc::UnboundedReceiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (port, serve_http_upstream(listener, response))
}

pub fn serve_http_upstream(
    listener: TcpListener,
    response: Vec<u8>,
) -> mpsc::UnboundedReceiver<Captured> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let response = response.clone();
            tokio::spawn(async move {
                let captured = read_request(&mut stream).await;
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
                let _ = tx.send(captured);
            });
        }
    });
    rx
}

/// Upstream that echoes each request body back with status 200.
pub async fn echo_upstream() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let captured = read_request(&mut stream).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
                    captured.body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&captured.body).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    port
}

pub fn websocket_request(path: &str, host: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Protocol: vite-hmr\r\n\
         \r\n"
    )
}

pub const SWITCHING_PROTOCOLS: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
Sec-WebSocket-Protocol: vite-hmr\r\n\
\r\n";
