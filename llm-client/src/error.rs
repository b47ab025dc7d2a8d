use thiserror::Error;

use crate::provider::Capability;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error(
        "API key not found for {provider}. Set {env_var} environment variable or add to config."
    )]
    MissingApiKey { provider: String, env_var: String },

    #[error("Backend not found: {0}")]
    UnknownBackend(String),

    #[error("{provider} does not support {capability}")]
    Unsupported {
        provider: String,
        capability: Capability,
    },

    #[error("Rate limit exceeded{}", .retry_after.map(|s| format!(". Retry after {} seconds", s)).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    #[error("Server overloaded (HTTP 503): {message}")]
    ServerOverloaded { message: String },

    #[error("API error{}: {message}", status_code.map(|c| format!(" (HTTP {})", c)).unwrap_or_default())]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Malformed response stream: {0}")]
    StreamFormat(String),

    #[error("JSON error: {0}")]
    Json(#[source] serde_json::Error),

    #[error("Unknown image extension: {0}")]
    UnknownImageType(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

// Error messages never include the request URL.
impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.without_url())
    }
}

// serde_json wraps read failures and truncated input in its own error type.
// Both surface as Io.
impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() || err.is_eof() {
            Self::Io(err.into())
        } else {
            Self::Json(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
