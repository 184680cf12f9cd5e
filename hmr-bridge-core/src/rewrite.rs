//! Loopback URL rewriting
//!
//! A URL that names `localhost`, `127.0.0.1` or `0.0.0.0` means "the host
//! machine" to a browser running on the host, but "this container" to one
//! running inside an isolated environment. [`Rewriter`] maps such URLs to the
//! address under which the host is reachable from the current context.
//!
//! The rules form a fixed, ordered table. Host rules substitute the matched
//! `host:port`; the resource rule only marks a URL as dev-server traffic. A
//! rewritten URL never matches a host rule again, so rewriting is idempotent.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::context::ExecutionContext;
use crate::target::TargetEndpoint;

/// What a matching rule does to the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// Replace the matched `host:port` with the context's host.
    Host,
    /// Recognise dev-server traffic without changing it.
    Detect,
}

#[derive(Debug)]
pub struct RewriteRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub replacement: Replacement,
}

/// How the port of a rewritten authority is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortPolicy {
    /// Keep the port the URL named.
    #[default]
    Preserve,
    /// Always use this port.
    Fixed(u16),
}

static RULES: LazyLock<Vec<RewriteRule>> = LazyLock::new(|| {
    let rule = |name, pattern: &str, replacement| RewriteRule {
        name,
        pattern: Regex::new(pattern).expect("rewrite rule pattern is valid"),
        replacement,
    };
    vec![
        rule("localhost", r"\blocalhost:(\d+)", Replacement::Host),
        rule("ipv4-loopback", r"\b127\.0\.0\.1:(\d+)", Replacement::Host),
        rule("any-address", r"\b0\.0\.0\.0:(\d+)", Replacement::Host),
        rule(
            "dev-server-resource",
            r":(\d+)/(@vite|@id|@fs|src|node_modules|__vite_ping)\b",
            Replacement::Detect,
        ),
    ]
});

/// Whether a host rule would match `host` as an authority.
fn is_loopback_host(host: &str) -> bool {
    let authority = format!("{host}:1");
    RULES
        .iter()
        .filter(|r| r.replacement == Replacement::Host)
        .any(|r| r.pattern.is_match(&authority))
}

/// The rule table, in evaluation order.
pub fn rewrite_rules() -> &'static [RewriteRule] {
    &RULES
}

/// Rewrites loopback URLs for one execution context and target.
///
/// Built once from the context and the resolved target; holds no other state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewriter {
    host: Option<String>,
    ports: PortPolicy,
}

impl Rewriter {
    pub fn new(context: &ExecutionContext, target: &TargetEndpoint) -> Self {
        let host = match context {
            ExecutionContext::Local => None,
            ExecutionContext::GenericContainer => Some(target.host.clone()),
            ExecutionContext::NamedPlatform(site) => Some(site.domain()),
        };
        // Swapping one loopback name for another changes nothing and would
        // leave output the host rules still match.
        let host = host.filter(|h| {
            let loopback = is_loopback_host(h);
            if loopback {
                tracing::debug!(host = %h, "replacement host is loopback, rewriting disabled");
            }
            !loopback
        });
        Self {
            host,
            ports: PortPolicy::Preserve,
        }
    }

    pub fn with_port_policy(mut self, ports: PortPolicy) -> Self {
        self.ports = ports;
        self
    }

    /// Host that replaces loopback addresses, if rewriting is active.
    pub fn replacement_host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Whether any rule recognises `url` as loopback or dev-server traffic.
    pub fn matches(url: &str) -> bool {
        RULES.iter().any(|r| r.pattern.is_match(url))
    }

    pub fn rewrite<'a>(&self, url: &'a str) -> Cow<'a, str> {
        if !Self::matches(url) {
            return Cow::Borrowed(url);
        }
        let Some(host) = self.host.as_deref() else {
            return Cow::Borrowed(url);
        };

        let mut out = url.to_string();
        for rule in RULES.iter() {
            if rule.replacement != Replacement::Host {
                continue;
            }
            out = rule
                .pattern
                .replace_all(&out, |caps: &Captures<'_>| {
                    let port = match self.ports {
                        PortPolicy::Preserve => caps[1].to_string(),
                        PortPolicy::Fixed(p) => p.to_string(),
                    };
                    format!("{host}:{port}")
                })
                .into_owned();
        }

        if out == url {
            return Cow::Borrowed(url);
        }
        tracing::debug!(from = url, to = %out, "rewrote loopback url");
        Cow::Owned(out)
    }
}
