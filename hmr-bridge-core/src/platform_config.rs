//! Reader for the platform project file (`.ddev/config.yaml`).
//!
//! Only the handful of fields that name the project's hostname are read.
//! Everything else in the file is ignored, and a file that cannot be read or
//! parsed yields the defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse YAML in {0}: {1}")]
    YamlParse(PathBuf, serde_yaml::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub project_tld: Option<String>,

    #[serde(default)]
    pub additional_fqdns: Vec<String>,
}

impl PlatformConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Self::parse(&raw).map_err(|e| ConfigError::YamlParse(path.to_path_buf(), e))
    }

    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: Self = serde_yaml::from_str(raw)?;
        config.name = non_empty(config.name);
        config.project_tld = non_empty(config.project_tld);
        config.additional_fqdns.retain(|f| !f.trim().is_empty());
        Ok(config)
    }

    /// Load the first readable file among `candidates`.
    ///
    /// Missing files are skipped quietly; unreadable or malformed ones are
    /// logged and skipped.
    pub fn load_first(candidates: &[PathBuf]) -> Option<Self> {
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            match Self::load(path) {
                Ok(config) => return Some(config),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring platform config, using defaults");
                }
            }
        }
        None
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
