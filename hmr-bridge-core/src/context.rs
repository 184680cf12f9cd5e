//! Execution context detection
//!
//! The bridge behaves differently depending on where it runs:
//!
//! - **Local**: on the host itself; loopback already reaches the dev server.
//! - **GenericContainer**: inside a plain container; the host is reachable
//!   as `host.docker.internal`.
//! - **NamedPlatform**: inside a DDEV project container; the host exposes
//!   the project as `{site}.{tld}`.
//!
//! Detection only reads the environment and the filesystem. It never fails:
//! anything unreadable is treated as absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::platform_config::PlatformConfig;

/// Hostname a generic container uses to reach its host.
pub const CONTAINER_HOST: &str = "host.docker.internal";

/// Domain suffix used when neither the environment nor the config names one.
pub const DEFAULT_PLATFORM_TLD: &str = "ddev.site";

/// Site identifier used when the platform is detected but unnamed.
pub const DEFAULT_SITE_NAME: &str = "project";

const PLATFORM_MARKER_DIRS: &[&str] = &[".ddev", "var/www/html/.ddev"];
const PLATFORM_CONFIG_FILE: &str = ".ddev/config.yaml";
const PLATFORM_WEB_ROOT: &str = "var/www/html";
const CONTAINER_MARKER_FILES: &[&str] = &[".dockerenv"];
const INIT_CGROUP_FILE: &str = "proc/1/cgroup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformSite {
    pub site: String,
    pub tld: String,
    /// Explicit hostname that overrides `{site}.{tld}`.
    pub hostname: Option<String>,
}

impl PlatformSite {
    pub fn new(site: impl Into<String>, tld: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            tld: tld.into(),
            hostname: None,
        }
    }

    pub fn domain(&self) -> String {
        match &self.hostname {
            Some(h) => h.clone(),
            None => format!("{}.{}", self.site, self.tld),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionContext {
    Local,
    GenericContainer,
    NamedPlatform(PlatformSite),
}

impl ExecutionContext {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionContext::Local => "local",
            ExecutionContext::GenericContainer => "container",
            ExecutionContext::NamedPlatform(_) => "platform",
        }
    }

    /// Whether requests cross an isolation boundary to reach the host.
    pub fn is_isolated(&self) -> bool {
        !matches!(self, ExecutionContext::Local)
    }

    /// Host under which the dev server is reachable from this context.
    pub fn upstream_host(&self) -> String {
        match self {
            ExecutionContext::Local => "localhost".to_string(),
            ExecutionContext::GenericContainer => CONTAINER_HOST.to_string(),
            ExecutionContext::NamedPlatform(site) => site.domain(),
        }
    }
}

/// Source of environment variables consulted during detection.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;

    /// Non-empty value of `key`, trimmed.
    fn value(&self, key: &str) -> Option<String> {
        self.var(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.value(key)
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1")
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Detects the [`ExecutionContext`] from an environment and a filesystem root.
pub struct Detector<E> {
    env: E,
    root: PathBuf,
    project_dir: PathBuf,
}

impl Detector<ProcessEnv> {
    pub fn from_process() -> Self {
        let project_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(ProcessEnv, PathBuf::from("/"), project_dir)
    }
}

impl<E: EnvSource> Detector<E> {
    pub fn new(env: E, root: PathBuf, project_dir: PathBuf) -> Self {
        Self {
            env,
            root,
            project_dir,
        }
    }

    pub fn detect(&self) -> ExecutionContext {
        if let Some(site) = self.named_platform() {
            return ExecutionContext::NamedPlatform(site);
        }
        if self.in_container() {
            return ExecutionContext::GenericContainer;
        }
        ExecutionContext::Local
    }

    fn named_platform(&self) -> Option<PlatformSite> {
        let flagged =
            self.env.flag("IS_DDEV_PROJECT") || self.env.value("DDEV_SITENAME").is_some();
        let marked = PLATFORM_MARKER_DIRS
            .iter()
            .any(|d| self.root.join(d).is_dir());
        if !flagged && !marked {
            return None;
        }

        // Only consulted for values the environment does not provide.
        let needs_config = self.env.value("DDEV_SITENAME").is_none()
            || self.env.value("DDEV_TLD").is_none()
            || self.explicit_hostname().is_none();
        let config = if needs_config {
            PlatformConfig::load_first(&self.config_candidates()).unwrap_or_default()
        } else {
            PlatformConfig::default()
        };

        let site = self
            .env
            .value("DDEV_SITENAME")
            .or(config.name)
            .unwrap_or_else(|| DEFAULT_SITE_NAME.to_string());
        let tld = self
            .env
            .value("DDEV_TLD")
            .or(config.project_tld)
            .unwrap_or_else(|| DEFAULT_PLATFORM_TLD.to_string());
        let hostname = self
            .explicit_hostname()
            .or_else(|| config.additional_fqdns.into_iter().next());

        Some(PlatformSite {
            site,
            tld,
            hostname,
        })
    }

    fn explicit_hostname(&self) -> Option<String> {
        if let Some(h) = self.env.value("DDEV_HOSTNAME") {
            // May be a comma separated list; the first entry is primary.
            return h
                .split(',')
                .map(str::trim)
                .find(|s| !s.is_empty())
                .map(str::to_string);
        }
        self.env
            .value("DDEV_PRIMARY_URL")
            .and_then(|url| host_of_url(&url))
    }

    fn config_candidates(&self) -> Vec<PathBuf> {
        vec![
            self.project_dir.join(PLATFORM_CONFIG_FILE),
            self.root.join(PLATFORM_WEB_ROOT).join(PLATFORM_CONFIG_FILE),
        ]
    }

    fn in_container(&self) -> bool {
        if self.env.flag("DOCKER_CONTAINER") {
            return true;
        }
        if CONTAINER_MARKER_FILES
            .iter()
            .any(|f| self.root.join(f).exists())
        {
            return true;
        }
        cgroup_mentions_container(&self.root.join(INIT_CGROUP_FILE))
    }
}

/// Detect the context of the current process.
pub fn detect() -> ExecutionContext {
    Detector::from_process().detect()
}

fn cgroup_mentions_container(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|s| s.contains("docker") || s.contains("containerd"))
        .unwrap_or(false)
}

fn host_of_url(url: &str) -> Option<String> {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = match authority.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => authority,
    };
    (!host.is_empty()).then(|| host.to_string())
}
