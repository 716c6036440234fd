//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: where the
//! authority and realtime endpoints live, how the session is timed, which
//! credential backend to use, and the last identifier that logged in.
//!
//! Configuration is stored at `~/.config/courier-session/config.json`.
//! A few fields can be overridden from the environment (see [`Config::apply_env`]).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::state::{DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_SAFETY_MARGIN_SECS};
use crate::session::SessionConfig;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "courier-session";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_REALTIME_URL: &str = "ws://localhost:8080/ws";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROFILE: &str = "default";

const ENV_API_URL: &str = "COURIER_API_URL";
const ENV_REALTIME_URL: &str = "COURIER_REALTIME_URL";
const ENV_SAFETY_MARGIN: &str = "COURIER_SAFETY_MARGIN_SECS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub realtime_url: String,
    pub safety_margin_secs: u64,
    pub handshake_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
    /// Keychain account the token is stored under
    pub profile: String,
    pub last_identifier: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            safety_margin_secs: DEFAULT_SAFETY_MARGIN_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credential_backend: CredentialBackend::default(),
            profile: DEFAULT_PROFILE.to_string(),
            last_identifier: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
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

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(url) = lookup(ENV_REALTIME_URL) {
            self.realtime_url = url;
        }
        if let Some(raw) = lookup(ENV_SAFETY_MARGIN) {
            match raw.trim().parse() {
                Ok(secs) => self.safety_margin_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring invalid {}", ENV_SAFETY_MARGIN),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            safety_margin: Duration::from_secs(self.safety_margin_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
