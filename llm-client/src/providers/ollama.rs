//! Ollama provider
//!
//! Talks to a local inference server. Replies arrive as newline-delimited
//! JSON objects, one per generated fragment.

use std::io::BufReader;

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::http::{HttpConfig, Transport};
use crate::provider::{
    Capability, LlmProvider, LlmRequest, LlmResponse, Role, TextStream, TokenUsage,
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "11434";

const CAPABILITIES: &[Capability] = &[Capability::Text, Capability::StreamingText];

/// Provider for an Ollama server
pub struct OllamaProvider {
    model: String,
    base_url: String,
    transport: Transport,
}

impl OllamaProvider {
    pub fn new(model: &str, base_url: &str, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            transport: Transport::new(http)?,
        })
    }

    /// Send the request and return the undecoded reply fragments.
    ///
    /// A single prompt goes to the generate endpoint, a conversation to chat.
    fn chunks(
        &self,
        request: &LlmRequest,
    ) -> Result<impl Iterator<Item = Result<StreamChunk>> + use<>> {
        let response = if request.messages.len() <= 1 {
            let url = format!("{}/api/generate", self.base_url);
            self.transport
                .post_json(&url, &[], &build_generate_request(request, &self.model))?
        } else {
            let url = format!("{}/api/chat", self.base_url);
            self.transport
                .post_json(&url, &[], &build_chat_request(request, &self.model))?
        };

        Ok(decode_chunks(BufReader::new(response)))
    }
}

/// Work out the server URL from an `OLLAMA_HOST` style value
/// (`host`, `host:port`, `scheme://host:port`).
pub fn parse_ollama_host(value: &str) -> String {
    let value = value.trim();
    let (scheme, hostport, default_port) = match value.split_once("://") {
        None => ("http", value, DEFAULT_PORT),
        Some(("http", rest)) => ("http", rest, "80"),
        Some(("https", rest)) => ("https", rest, "443"),
        Some((scheme, rest)) => (scheme, rest, DEFAULT_PORT),
    };
    let hostport = hostport.trim_end_matches('/');

    let (host, port) = match hostport.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (host, port)
        }
        _ => (hostport, default_port),
    };
    let host = if host.is_empty() { DEFAULT_HOST } else { host };

    format!("{}://{}:{}", scheme, host, port)
}

/// Server URL when nothing is configured: `OLLAMA_HOST`, else the local default
pub fn default_ollama_url() -> String {
    parse_ollama_host(&std::env::var("OLLAMA_HOST").unwrap_or_default())
}

// Ollama API request/response types

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// One line of a streamed reply from either endpoint
#[derive(Debug, Deserialize)]
struct StreamChunk {
    /// Set by the generate endpoint
    #[serde(default)]
    response: Option<String>,
    /// Set by the chat endpoint
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

impl StreamChunk {
    fn text(&self) -> &str {
        self.response
            .as_deref()
            .or(self.message.as_ref().map(|m| m.content.as_str()))
            .unwrap_or_default()
    }

    fn usage(&self) -> Option<TokenUsage> {
        Some(TokenUsage {
            input_tokens: self.prompt_eval_count?,
            output_tokens: self.eval_count?,
        })
    }
}

fn build_generate_request(request: &LlmRequest, model: &str) -> GenerateRequest {
    GenerateRequest {
        model: model.to_string(),
        prompt: request.messages.first().cloned().unwrap_or_default(),
        system: request.system_prompt.clone(),
        format: request.json.then_some("json"),
        stream: true,
    }
}

fn build_chat_request(request: &LlmRequest, model: &str) -> ChatRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system_prompt {
        messages.push(ChatMessage {
            role: "system",
            content: system.clone(),
        });
    }

    for (role, text) in request.turns() {
        messages.push(ChatMessage {
            role: match role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: text.to_string(),
        });
    }

    ChatRequest {
        model: model.to_string(),
        messages,
        format: request.json.then_some("json"),
        stream: true,
    }
}

/// Decode newline-delimited chunks, turning in-band errors into `Err`
fn decode_chunks<R: std::io::Read>(reader: R) -> impl Iterator<Item = Result<StreamChunk>> {
    serde_json::Deserializer::from_reader(reader)
        .into_iter::<StreamChunk>()
        .map(|chunk| -> Result<StreamChunk> {
            let chunk = chunk?;
            if let Some(message) = &chunk.error {
                return Err(LlmError::ApiError {
                    message: format!("ollama: {}", message),
                    status_code: None,
                });
            }
            Ok(chunk)
        })
}

impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let mut content = String::new();
        let mut usage = None;

        for chunk in self.chunks(request)? {
            let chunk = chunk?;
            content.push_str(chunk.text());
            if chunk.done {
                usage = chunk.usage();
            }
        }

        Ok(LlmResponse {
            content,
            model: self.model.clone(),
            usage,
        })
    }

    fn stream(&self, request: &LlmRequest) -> Result<TextStream<'_>> {
        let fragments = self.chunks(request)?.filter_map(|chunk| match chunk {
            Ok(chunk) if chunk.text().is_empty() => None,
            Ok(chunk) => Some(Ok(chunk.text().to_string())),
            Err(e) => Some(Err(e)),
        });
        Ok(Box::new(fragments))
    }
}
