//! LLM provider implementations

mod google;
pub mod mock;
mod ollama;
mod openai;

use std::time::Duration;

pub use google::{GenerateContentResponse, GoogleProvider};
pub use mock::MockProvider;
pub use ollama::{OllamaProvider, default_ollama_url, parse_ollama_host};
pub use openai::OpenAIProvider;

use crate::config::BackendConfig;
use crate::error::{LlmError, Result};
use crate::http::HttpConfig;
use crate::provider::LlmProvider;

const OLLAMA_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Supported backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Ollama,
    Google,
}

impl ProviderKind {
    /// Parse the `mode` of a backend
    pub fn from_mode(mode: &str) -> Result<Self> {
        match mode.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "google" | "gemini" => Ok(Self::Google),
            _ => Err(LlmError::ConfigError(format!("Unknown backend mode: {}", mode))),
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Ollama => None,
            Self::Google => Some("GOOGLE_API_KEY"),
        }
    }
}

/// Create a provider instance for a configured backend
pub fn get_provider(
    name: &str,
    backend: &BackendConfig,
    http: &HttpConfig,
) -> Result<Box<dyn LlmProvider>> {
    if backend.mode.is_empty() {
        return Err(LlmError::ConfigError(format!(
            "backend {:?} needs mode= config",
            name
        )));
    }
    let kind = ProviderKind::from_mode(&backend.mode)?;

    match kind {
        ProviderKind::OpenAI => {
            let api_key = get_api_key(backend, "OPENAI_API_KEY", "OpenAI")?;
            Ok(Box::new(OpenAIProvider::new(
                backend.model.as_deref(),
                backend.url.as_deref(),
                api_key,
                http,
            )?))
        }
        ProviderKind::Ollama => {
            let model = backend.model.as_deref().ok_or_else(|| {
                LlmError::ConfigError(format!("backend {:?} needs model= config", name))
            })?;
            let url = backend.url.clone().unwrap_or_else(default_ollama_url);
            let http = http.clone().with_connect_timeout(OLLAMA_CONNECT_TIMEOUT);
            Ok(Box::new(OllamaProvider::new(model, &url, &http)?))
        }
        ProviderKind::Google => {
            let api_key = get_api_key(backend, "GOOGLE_API_KEY", "Google")?;
            Ok(Box::new(GoogleProvider::new(
                backend.model.as_deref(),
                backend.url.as_deref(),
                api_key,
                http,
            )?))
        }
    }
}

/// Get API key from config or environment variable
fn get_api_key(backend: &BackendConfig, env_var: &str, provider_name: &str) -> Result<String> {
    // Check config first
    if let Some(key) = backend.api_key.clone() {
        return Ok(key);
    }

    // Fall back to environment variable
    std::env::var(env_var).map_err(|_| LlmError::MissingApiKey {
        provider: provider_name.to_string(),
        env_var: env_var.to_string(),
    })
}
