//! Client configuration (`elsa.toml`).
//!
//! ```toml
//! [server]
//! base_url = "http://elsa.example.com/"
//! request_timeout_secs = 60
//! api_key = "..."
//!
//! [query]
//! default_limit = 100
//! local_groupby_limit = 1000
//! ```
//!
//! `ELSA_BASE_URL` and `ELSA_API_KEY` override the file.

use std::path::Path;
use std::time::Duration;

use elsa_core::WorkspaceConfig;
use serde::Deserialize;

use crate::error::{ClientError, Result};

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QueryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    #[serde(default = "default_local_groupby_limit")]
    pub local_groupby_limit: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            local_groupby_limit: default_local_groupby_limit(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1/".to_string()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_limit() -> u64 {
    elsa_core::meta::DEFAULT_LIMIT
}
fn default_local_groupby_limit() -> u64 {
    elsa_core::grouping::LOCAL_GROUP_BY_LIMIT
}

impl Config {
    /// Reads `path` when it exists, defaults otherwise. Environment
    /// overrides are applied either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ClientError::Config {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            Self::parse(&content).map_err(|message| ClientError::Config {
                path: path.display().to_string(),
                message,
            })?
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("ELSA_BASE_URL").filter(|v| !v.is_empty()) {
            self.server.base_url = url;
        }
        if let Some(key) = lookup("ELSA_API_KEY").filter(|v| !v.is_empty()) {
            self.server.api_key = Some(key);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn workspace_config(&self) -> WorkspaceConfig {
        WorkspaceConfig {
            default_limit: self.query.default_limit,
            local_groupby_limit: self.query.local_groupby_limit,
        }
    }
}
