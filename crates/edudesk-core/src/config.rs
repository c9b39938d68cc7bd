//! Application configuration management.
//!
//! Configuration is stored at `~/.config/edudesk/config.json` and covers the
//! API base URL, request timeout, default cache TTL, where tokens are kept
//! and the last used username.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::auth::TokenStorageKind;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "edudesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Base URL used when neither the config file nor the environment sets one
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// 30s allows for slow list endpoints while failing fast enough for the console.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_TTL_SECS: u64 = 60;

/// Environment override for the API base URL
pub const BASE_URL_ENV: &str = "EDUDESK_BASE_URL";

/// Environment override for the login username
pub const USERNAME_ENV: &str = "EDUDESK_USERNAME";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub default_ttl_secs: u64,
    pub token_storage: TokenStorageKind,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            default_ttl_secs: DEFAULT_TTL_SECS,
            token_storage: TokenStorageKind::default(),
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Base URL with the environment taking precedence over the file.
    pub fn resolved_base_url(&self) -> String {
        std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Username from the environment, falling back to the last one used.
    pub fn resolved_username(&self) -> Option<String> {
        std::env::var(USERNAME_ENV)
            .ok()
            .filter(|u| !u.is_empty())
            .or_else(|| self.last_username.clone())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.resolved_base_url(),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// The subset of configuration the HTTP client needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
