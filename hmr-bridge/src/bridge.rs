use std::borrow::Cow;
use std::net::IpAddr;

use hmr_bridge_core::{ExecutionContext, PortPolicy, Rewriter, TargetEndpoint};
use hyper::Uri;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::defaults::UPSTREAM_CONNECT_TIMEOUT;
use crate::error::BridgeError;

/// State shared by every connection handler.
///
/// Built once after detection and probing, then only read. Handlers receive
/// it behind an `Arc`; nothing in here is re-probed or mutated afterwards.
pub struct Bridge {
    context: ExecutionContext,
    target: TargetEndpoint,
    rewriter: Rewriter,
    client: Client<HttpConnector, Incoming>,
}

/// Where a single request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub upstream: TargetEndpoint,
    pub path_and_query: String,
    /// The request named a loopback URL that was rewritten.
    pub rewritten: bool,
}

impl Bridge {
    pub fn new(context: ExecutionContext, target: TargetEndpoint) -> Self {
        let rewriter = Rewriter::new(&context, &target);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(UPSTREAM_CONNECT_TIMEOUT));
        connector.set_nodelay(true);
        // Outbound connections are never reused across requests.
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self {
            context,
            target,
            rewriter,
            client,
        }
    }

    pub fn with_port_policy(mut self, ports: PortPolicy) -> Self {
        self.rewriter = self.rewriter.with_port_policy(ports);
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn target(&self) -> &TargetEndpoint {
        &self.target
    }

    pub fn rewriter(&self) -> &Rewriter {
        &self.rewriter
    }

    pub fn client(&self) -> &Client<HttpConnector, Incoming> {
        &self.client
    }

    /// Pick the upstream for a request URI.
    ///
    /// Origin-form requests go to the resolved target. Absolute-form requests
    /// (a browser using the bridge as its HTTP proxy) go through the rewriter
    /// and follow the rewritten authority when a loopback address was replaced.
    pub fn route(&self, uri: &Uri) -> Route {
        let path_and_query = uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/")
            .to_string();
        let fallback = Route {
            upstream: self.target.clone(),
            path_and_query,
            rewritten: false,
        };

        if uri.authority().is_none() {
            return fallback;
        }

        let original = uri.to_string();
        let Cow::Owned(rewritten) = self.rewriter.rewrite(&original) else {
            return fallback;
        };
        let Ok(rewritten) = rewritten.parse::<Uri>() else {
            return fallback;
        };
        let Some(authority) = rewritten.authority() else {
            return fallback;
        };

        let port = authority.port_u16().unwrap_or(80);
        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        Route {
            upstream: TargetEndpoint::new(host, port),
            path_and_query: rewritten
                .path_and_query()
                .map(|p| p.as_str())
                .unwrap_or("/")
                .to_string(),
            rewritten: true,
        }
    }
}

/// Refuse a target that is the bridge's own listener.
///
/// A loopback target on the listen port would forward every request back
/// into the bridge until file descriptors run out.
pub fn ensure_not_self(target: &TargetEndpoint, listen_port: u16) -> Result<(), BridgeError> {
    if target.port == listen_port && is_loopback_host(&target.host) {
        return Err(BridgeError::SelfTarget(target.clone(), listen_port));
    }
    Ok(())
}

fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback() || ip.is_unspecified())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmr_bridge_core::PlatformSite;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn origin_form_goes_to_resolved_target() {
        let bridge = Bridge::new(
            ExecutionContext::GenericContainer,
            TargetEndpoint::new("host.internal", 5173),
        );
        let route = bridge.route(&uri("/app.js?v=3"));
        assert_eq!(route.upstream, TargetEndpoint::new("host.internal", 5173));
        assert_eq!(route.path_and_query, "/app.js?v=3");
        assert!(!route.rewritten);
    }

    #[tokio::test]
    async fn absolute_loopback_url_follows_rewritten_authority() {
        let bridge = Bridge::new(
            ExecutionContext::GenericContainer,
            TargetEndpoint::new("host.internal", 5173),
        );
        let route = bridge.route(&uri("http://localhost:3000/api/items?page=2"));
        assert_eq!(route.upstream, TargetEndpoint::new("host.internal", 3000));
        assert_eq!(route.path_and_query, "/api/items?page=2");
        assert!(route.rewritten);
    }

    #[tokio::test]
    async fn platform_websocket_url_routes_to_site_domain() {
        let bridge = Bridge::new(
            ExecutionContext::NamedPlatform(PlatformSite::new("mysite", "example.test")),
            TargetEndpoint::new("mysite.example.test", 5173),
        );
        let route = bridge.route(&uri("ws://localhost:5173/hmr"));
        assert_eq!(
            route.upstream,
            TargetEndpoint::new("mysite.example.test", 5173)
        );
        assert_eq!(route.path_and_query, "/hmr");
    }

    #[tokio::test]
    async fn absolute_url_is_left_alone_locally() {
        let bridge = Bridge::new(
            ExecutionContext::Local,
            TargetEndpoint::new("localhost", 5173),
        );
        let route = bridge.route(&uri("http://localhost:3000/x"));
        assert_eq!(route.upstream, TargetEndpoint::new("localhost", 5173));
        assert_eq!(route.path_and_query, "/x");
        assert!(!route.rewritten);
    }

    #[tokio::test]
    async fn non_loopback_absolute_url_goes_to_target() {
        let bridge = Bridge::new(
            ExecutionContext::GenericContainer,
            TargetEndpoint::new("host.internal", 5173),
        );
        let route = bridge.route(&uri("http://cdn.example.com/lib.js"));
        assert_eq!(route.upstream, TargetEndpoint::new("host.internal", 5173));
        assert_eq!(route.path_and_query, "/lib.js");
    }

    #[tokio::test]
    async fn fixed_port_policy_pins_rewritten_upstream() {
        let bridge = Bridge::new(
            ExecutionContext::GenericContainer,
            TargetEndpoint::new("host.internal", 5173),
        )
        .with_port_policy(PortPolicy::Fixed(5173));
        let route = bridge.route(&uri("http://127.0.0.1:3000/src/main.ts"));
        assert_eq!(route.upstream, TargetEndpoint::new("host.internal", 5173));
        assert!(route.rewritten);
    }

    #[test]
    fn target_on_own_listen_port_is_refused() {
        for host in ["localhost", "127.0.0.1", "0.0.0.0", "::1"] {
            let target = TargetEndpoint::new(host, 5173);
            assert!(
                matches!(
                    ensure_not_self(&target, 5173),
                    Err(BridgeError::SelfTarget(_, 5173))
                ),
                "{host}"
            );
        }
    }

    #[test]
    fn other_ports_and_hosts_are_accepted() {
        assert!(ensure_not_self(&TargetEndpoint::new("localhost", 5173), 3000).is_ok());
        assert!(ensure_not_self(&TargetEndpoint::new("host.docker.internal", 3000), 3000).is_ok());
        assert!(ensure_not_self(&TargetEndpoint::new("mysite.example.test", 3000), 3000).is_ok());
    }
}
