//! HMR Bridge Core - environment detection and address rewriting
//!
//! This crate holds everything the bridge decides before a socket is opened:
//! which execution context the process runs in, where the dev server lives,
//! and how loopback URLs translate across the container boundary.
//!
//! Networking (probing, proxying, tunnelling) lives in the `hmr-bridge` crate.

mod context;
mod platform_config;
mod rewrite;
mod target;

pub use context::{
    CONTAINER_HOST, DEFAULT_PLATFORM_TLD, DEFAULT_SITE_NAME, Detector, EnvSource,
    ExecutionContext, PlatformSite, ProcessEnv, detect,
};
pub use platform_config::{ConfigError, PlatformConfig};
pub use rewrite::{PortPolicy, Replacement, RewriteRule, Rewriter, rewrite_rules};
pub use target::{TargetEndpoint, TargetParseError};
