use std::fmt;

use crate::error::{LlmError, Result};
use crate::image::LoadedImage;

/// Request to send to an LLM provider
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    /// Conversation turns, alternating user and assistant, ending with a user turn
    pub messages: Vec<String>,
    /// Images attached to the final user turn
    pub images: Vec<LoadedImage>,
    /// Ask the model for a JSON object reply
    pub json: bool,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Single-turn request with no system prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![prompt.into()],
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: LoadedImage) -> Self {
        self.images.push(image);
        self
    }

    /// Iterate over turns paired with their role, user first
    pub fn turns(&self) -> impl Iterator<Item = (Role, &str)> {
        self.messages.iter().enumerate().map(|(i, text)| {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            (role, text.as_str())
        })
    }
}

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Response from an LLM provider
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Token usage information
#[derive(Debug, Clone)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Something a backend can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Text,
    StreamingText,
    Vision,
    Speech,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::StreamingText => "streaming text",
            Self::Vision => "vision",
            Self::Speech => "speech",
        };
        f.write_str(name)
    }
}

/// Incrementally produced reply text
pub type TextStream<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// Trait for LLM providers
pub trait LlmProvider {
    /// Get the provider name for display
    fn name(&self) -> &'static str;

    /// Everything this provider can be asked to do
    fn capabilities(&self) -> &'static [Capability];

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Execute a completion request and wait for the whole reply
    fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Execute a completion request, yielding reply text as it arrives
    fn stream(&self, _request: &LlmRequest) -> Result<TextStream<'_>> {
        Err(self.unsupported(Capability::StreamingText))
    }

    /// Synthesize speech, returning encoded audio
    fn speak(&self, _text: &str) -> Result<Vec<u8>> {
        Err(self.unsupported(Capability::Speech))
    }

    fn unsupported(&self, capability: Capability) -> LlmError {
        LlmError::Unsupported {
            provider: self.name().to_string(),
            capability,
        }
    }
}
