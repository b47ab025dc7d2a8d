//! LLM client library for the `ai` command-line tool
//!
//! Provides a unified interface over several backends:
//! - OpenAI (chat, vision, speech)
//! - Ollama (local server, streamed text)
//! - Google Gemini (text and vision, streamed text)
//!
//! Each backend declares the [`Capability`] set it supports, and callers
//! check that set before dispatching. Streamed Gemini replies are decoded
//! incrementally by [`stream::ArrayStream`].

pub mod config;
pub mod error;
pub mod http;
pub mod image;
pub mod provider;
pub mod providers;
pub mod stream;

pub use config::{BackendConfig, Config};
pub use error::{LlmError, Result};
pub use http::HttpConfig;
pub use image::LoadedImage;
pub use provider::{
    Capability, LlmProvider, LlmRequest, LlmResponse, Role, TextStream, TokenUsage,
};
pub use providers::{MockProvider, ProviderKind, get_provider};
pub use stream::ArrayStream;
