//! Plain HTTP forwarding
//!
//! Requests are forwarded with method, path, query, headers and body intact;
//! only `Host` is replaced with the upstream's `host:port`. Response status,
//! headers and body stream back as they arrive.

use std::convert::Infallible;
use std::error::Error as StdError;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hmr_bridge_core::TargetEndpoint;
use hyper::body::Incoming;
use hyper::header::{HOST, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};

use crate::bridge::Bridge;
use crate::error::ProxyError;
use crate::tunnel;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> BoxBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn full_body<T: Into<Bytes>>(chunk: T) -> BoxBody {
    Full::new(chunk.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn text_response(status: StatusCode, message: &str) -> Response<BoxBody> {
    let mut resp = Response::new(full_body(message.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    resp
}

/// Replace `Host` with the upstream authority.
pub fn set_host(headers: &mut HeaderMap, upstream: &TargetEndpoint) -> Result<(), ProxyError> {
    let value = HeaderValue::from_str(&upstream.authority())
        .map_err(|_| ProxyError::InvalidUpstreamHost(upstream.authority()))?;
    headers.insert(HOST, value);
    Ok(())
}

/// Entry point for every inbound request.
///
/// An `Err` closes the inbound connection without a response; that is only
/// used when a tunnel cannot reach its upstream.
pub async fn handle(
    req: Request<Incoming>,
    bridge: Arc<Bridge>,
) -> Result<Response<BoxBody>, ProxyError> {
    if req.method() == Method::CONNECT {
        return Ok(text_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "CONNECT tunnelling is not supported",
        ));
    }
    if tunnel::is_websocket_upgrade(req.headers()) {
        return tunnel::handshake(req, &bridge).await;
    }
    Ok(forward(req, &bridge).await)
}

pub async fn forward(req: Request<Incoming>, bridge: &Bridge) -> Response<BoxBody> {
    let route = bridge.route(req.uri());
    let (parts, body) = req.into_parts();
    tracing::debug!(
        method = %parts.method,
        path = %route.path_and_query,
        upstream = %route.upstream,
        rewritten = route.rewritten,
        "proxying request"
    );

    let uri = match format!("http://{}{}", route.upstream, route.path_and_query).parse::<Uri>() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(error = %e, upstream = %route.upstream, "cannot build upstream uri");
            return bad_gateway();
        }
    };

    let mut outbound = Request::new(body);
    *outbound.method_mut() = parts.method;
    *outbound.uri_mut() = uri;
    *outbound.headers_mut() = parts.headers;
    if let Err(e) = set_host(outbound.headers_mut(), &route.upstream) {
        tracing::warn!(error = %e, "cannot set upstream host");
        return bad_gateway();
    }

    match bridge.client().request(outbound).await {
        Ok(resp) => resp.map(|body| body.boxed()),
        Err(e) => {
            tracing::warn!(error = %e, upstream = %route.upstream, "upstream request failed");
            if is_timeout(&e) {
                text_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")
            } else {
                bad_gateway()
            }
        }
    }
}

fn bad_gateway() -> Response<BoxBody> {
    text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
}

fn is_timeout(e: &(dyn StdError + 'static)) -> bool {
    let mut cur = Some(e);
    while let Some(err) = cur {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::TimedOut
        {
            return true;
        }
        cur = err.source();
    }
    false
}
