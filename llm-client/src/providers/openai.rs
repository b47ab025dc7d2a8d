//! OpenAI API provider
//!
//! Chat completions (text and vision) and text-to-speech.

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::http::{HttpConfig, Transport};
use crate::provider::{Capability, LlmProvider, LlmRequest, LlmResponse, Role, TokenUsage};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TEXT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_VISION_MODEL: &str = "gpt-4-vision-preview";
const SPEECH_MODEL: &str = "tts-1";
const SPEECH_VOICE: &str = "alloy";
const TEXT_MAX_TOKENS: u32 = 500;
const VISION_MAX_TOKENS: u32 = 4096;

const CAPABILITIES: &[Capability] = &[Capability::Text, Capability::Vision, Capability::Speech];

/// Provider for the OpenAI API
pub struct OpenAIProvider {
    model: Option<String>,
    base_url: String,
    api_key: String,
    transport: Transport,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider. `model` overrides the per-task defaults.
    pub fn new(
        model: Option<&str>,
        base_url: Option<&str>,
        api_key: String,
        http: &HttpConfig,
    ) -> Result<Self> {
        Ok(Self {
            model: model.map(str::to_string),
            base_url: base_url
                .unwrap_or(OPENAI_API_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            transport: Transport::new(http)?,
        })
    }

    fn auth(&self) -> [(&'static str, String); 1] {
        [("Authorization", format!("Bearer {}", self.api_key))]
    }
}

// OpenAI API request/response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'static str,
    input: &'a str,
    voice: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn build_chat_request(request: &LlmRequest, model: Option<&str>) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system_prompt {
        messages.push(Message {
            role: "system",
            content: MessageContent::Text(system.clone()),
        });
    }

    let last = request.messages.len().saturating_sub(1);
    for (i, (role, text)) in request.turns().enumerate() {
        let role = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = if i == last && !request.images.is_empty() {
            let mut parts = vec![ContentPart::Text {
                text: text.to_string(),
            }];
            parts.extend(request.images.iter().map(|image| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.to_data_url(),
                    detail: "high",
                },
            }));
            MessageContent::Parts(parts)
        } else {
            MessageContent::Text(text.to_string())
        };
        messages.push(Message { role, content });
    }

    let vision = !request.images.is_empty();
    let default_model = if vision {
        DEFAULT_VISION_MODEL
    } else {
        DEFAULT_TEXT_MODEL
    };
    let default_max = if vision {
        VISION_MAX_TOKENS
    } else {
        TEXT_MAX_TOKENS
    };

    ChatCompletionRequest {
        model: model.unwrap_or(default_model).to_string(),
        messages,
        max_tokens: request.max_tokens.unwrap_or(default_max),
        response_format: request.json.then_some(ResponseFormat {
            kind: "json_object",
        }),
    }
}

/// Extract the reply from a chat completion body.
///
/// OpenAI can report failures in the body of an otherwise successful reply.
fn parse_chat_response(body: &str, requested_model: &str) -> Result<LlmResponse> {
    let response: ChatCompletionResponse = serde_json::from_str(body)?;

    if let Some(error) = response.error {
        return Err(LlmError::ApiError {
            message: format!("openai: {}", error.message),
            status_code: None,
        });
    }

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| LlmError::ApiError {
            message: "openai: response contained no message".to_string(),
            status_code: None,
        })?;

    Ok(LlmResponse {
        content,
        model: response
            .model
            .unwrap_or_else(|| requested_model.to_string()),
        usage: response.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
    })
}

fn prefix_api_error(err: LlmError) -> LlmError {
    match err {
        LlmError::ApiError {
            message,
            status_code,
        } => LlmError::ApiError {
            message: format!("openai: {}", message),
            status_code,
        },
        other => other,
    }
}

impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let chat_request = build_chat_request(request, self.model.as_deref());
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .transport
            .post_json(&url, &self.auth(), &chat_request)
            .map_err(prefix_api_error)?;

        if let Some(ms) = response
            .headers()
            .get("openai-processing-ms")
            .and_then(|v| v.to_str().ok())
        {
            info!("processing time: {}ms", ms);
        }

        let body = self.transport.read_text(response)?;
        parse_chat_response(&body, &chat_request.model)
    }

    fn speak(&self, text: &str) -> Result<Vec<u8>> {
        let speech_request = SpeechRequest {
            model: SPEECH_MODEL,
            input: text,
            voice: SPEECH_VOICE,
        };
        let url = format!("{}/audio/speech", self.base_url);

        let response = self
            .transport
            .post_json(&url, &self.auth(), &speech_request)
            .map_err(prefix_api_error)?;
        Ok(response.bytes()?.to_vec())
    }
}
