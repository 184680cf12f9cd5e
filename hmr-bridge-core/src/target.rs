use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Resolved address of the dev server the bridge forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TargetEndpoint {
    pub host: String,
    pub port: u16,
}

impl TargetEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, as used for both the `Host` header and connecting.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for TargetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("target '{0}' is missing a port (expected host:port)")]
    MissingPort(String),

    #[error("target '{0}' has an invalid port")]
    InvalidPort(String),

    #[error("target '{0}' has an empty host")]
    EmptyHost(String),
}

impl FromStr for TargetEndpoint {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TargetParseError::MissingPort(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| TargetParseError::InvalidPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(TargetParseError::EmptyHost(s.to_string()));
        }
        Ok(Self::new(host, port))
    }
}
