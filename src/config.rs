//! Settings for the plugkit CLI
//!
//! The library itself takes all configuration as explicit constructor
//! parameters and never touches the process environment. This module is
//! the binary's edge: a TOML settings file naming, among other things,
//! which environment variable holds the provider API key.

use crate::error::Error;
use crate::mcp::McpSettings;
use crate::provider::OpenAiSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// CLI settings, loaded from `~/.plugkit/config.toml` or a `--config` path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory scanned for plugins
    pub plugins_dir: PathBuf,
    pub provider: ProviderSettings,
    pub mcp: McpTimeouts,
}

/// Provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Model identifier
    pub model: String,
    /// Chat-completions endpoint URL
    pub endpoint: String,
    /// Environment variable the binary reads the API key from
    pub api_key_env: String,
    /// Request timeout in seconds
    pub timeout: u64,
}

/// MCP timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpTimeouts {
    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub shutdown_grace: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            plugins_dir: home.join(".plugkit/plugins"),
            provider: ProviderSettings::default(),
            mcp: McpTimeouts::default(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout: 60,
        }
    }
}

impl Default for McpTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            request_timeout: 30,
            shutdown_grace: 3,
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, or the default location when
    /// `path` is `None`. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                home.join(".plugkit/config.toml")
            }
        };

        if !path.exists() {
            debug!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        debug!("Loading settings from {:?}", path);
        let contents = std::fs::read_to_string(&path)?;
        let settings: Settings = toml::from_str(&contents)
            .map_err(|e| Error::Settings(format!("{}: {}", path.display(), e)))?;
        Ok(settings)
    }

    /// Provider settings with the API key filled in by the caller.
    pub fn openai_settings(&self, api_key: String) -> OpenAiSettings {
        OpenAiSettings {
            api_key,
            model: self.provider.model.clone(),
            endpoint: self.provider.endpoint.clone(),
            timeout: Duration::from_secs(self.provider.timeout),
        }
    }

    /// MCP timeouts as the library's settings struct.
    pub fn mcp_settings(&self) -> McpSettings {
        McpSettings {
            connect_timeout: Duration::from_secs(self.mcp.connect_timeout),
            request_timeout: Duration::from_secs(self.mcp.request_timeout),
            shutdown_grace: Duration::from_secs(self.mcp.shutdown_grace),
        }
    }
}
