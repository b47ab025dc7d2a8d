use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{LlmError, Result};

/// Main configuration structure, stored in `~/.config/ai.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend to use when no --backend flag is provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend: Option<String>,

    /// Named backends
    #[serde(default)]
    pub backend: HashMap<String, BackendConfig>,
}

/// A named backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend implementation (openai, ollama, google)
    #[serde(default)]
    pub mode: String,

    /// Custom base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Model name/identifier for the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// API key (optional, can use env var instead)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl BackendConfig {
    pub fn new(mode: &str) -> Self {
        Self {
            mode: mode.to_string(),
            ..Self::default()
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home =
            std::env::var("HOME").map_err(|_| LlmError::ConfigError("HOME not set".into()))?;
        Ok(PathBuf::from(home).join(".config/ai.toml"))
    }

    /// Get a backend by name
    pub fn get_backend(&self, name: &str) -> Result<&BackendConfig> {
        self.backend
            .get(name)
            .ok_or_else(|| LlmError::UnknownBackend(name.to_string()))
    }

    /// Pick the requested backend, or the configured default
    pub fn resolve_backend<'a>(
        &'a self,
        requested: Option<&'a str>,
    ) -> Result<(&'a str, &'a BackendConfig)> {
        let name = requested
            .or(self.default_backend.as_deref())
            .ok_or_else(|| {
                LlmError::ConfigError(
                    "specify --backend or set default_backend in config".to_string(),
                )
            })?;
        Ok((name, self.get_backend(name)?))
    }
}
