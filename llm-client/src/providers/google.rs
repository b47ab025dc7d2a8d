//! Google Gemini provider
//!
//! Uses the JSON flavour of the Generative Language API. The streaming
//! endpoint answers with one JSON array whose elements are written as they are
//! generated, decoded here with [`ArrayStream`].

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::http::{HttpConfig, Transport};
use crate::provider::{
    Capability, LlmProvider, LlmRequest, LlmResponse, Role, TextStream, TokenUsage,
};
use crate::stream::ArrayStream;

const GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const CAPABILITIES: &[Capability] = &[
    Capability::Text,
    Capability::StreamingText,
    Capability::Vision,
];

/// Provider for the Gemini API
pub struct GoogleProvider {
    model: String,
    base_url: String,
    api_key: String,
    transport: Transport,
}

impl GoogleProvider {
    pub fn new(
        model: Option<&str>,
        base_url: Option<&str>,
        api_key: String,
        http: &HttpConfig,
    ) -> Result<Self> {
        Ok(Self {
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: base_url
                .unwrap_or(GOOGLE_API_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            transport: Transport::new(http)?,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn auth(&self) -> [(&'static str, String); 1] {
        [("x-goog-api-key", self.api_key.clone())]
    }
}

// Gemini API request/response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

/// One reply chunk; the whole reply when not streaming
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// All text in the first candidate
    pub fn text(&self) -> String {
        self.first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    fn usage(&self) -> Option<TokenUsage> {
        self.usage_metadata.as_ref().map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
    }
}

fn build_request(request: &LlmRequest) -> GenerateContentRequest {
    let last = request.messages.len().saturating_sub(1);
    let contents = request
        .turns()
        .enumerate()
        .map(|(i, (role, text))| {
            let mut parts = vec![Part::text(text)];
            if i == last {
                parts.extend(request.images.iter().map(|image| Part {
                    text: None,
                    inline_data: Some(Blob {
                        mime_type: image.mime_type.to_string(),
                        data: image.to_base64(),
                    }),
                }));
            }
            Content {
                role: Some(
                    match role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts,
            }
        })
        .collect();

    let generation_config = (request.json || request.max_tokens.is_some()).then(|| {
        GenerationConfig {
            response_mime_type: request.json.then_some("application/json"),
            max_output_tokens: request.max_tokens,
        }
    });

    GenerateContentRequest {
        contents,
        system_instruction: request.system_prompt.as_deref().map(|system| Content {
            role: None,
            parts: vec![Part::text(system)],
        }),
        generation_config,
    }
}

/// Extract the reply text from a non-streamed response
fn parse_text(response: &GenerateContentResponse) -> Result<String> {
    if response.candidates.is_empty() {
        return Err(LlmError::ApiError {
            message: "google: response contained no candidates".to_string(),
            status_code: None,
        });
    }

    match response.first_parts() {
        [part] => Ok(part.text.clone().unwrap_or_default()),
        parts => Err(LlmError::ApiError {
            message: format!("google: expected 1 part, got {}", parts.len()),
            status_code: None,
        }),
    }
}

impl LlmProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "Google"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let response = self.transport.post_json(
            &self.url("generateContent"),
            &self.auth(),
            &build_request(request),
        )?;
        let body = self.transport.read_text(response)?;
        let response: GenerateContentResponse = serde_json::from_str(&body)?;

        Ok(LlmResponse {
            content: parse_text(&response)?,
            model: response
                .model_version
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            usage: response.usage(),
        })
    }

    fn stream(&self, request: &LlmRequest) -> Result<TextStream<'_>> {
        let response = self.transport.post_json(
            &self.url("streamGenerateContent"),
            &self.auth(),
            &build_request(request),
        )?;

        let fragments = ArrayStream::<_, GenerateContentResponse>::from_reader(response)
            .map(|chunk| chunk.map(|chunk| chunk.text()))
            .filter(|fragment| !matches!(fragment, Ok(text) if text.is_empty()));
        Ok(Box::new(fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::LoadedImage;
    use serde_json::json;

    #[test]
    fn test_parse_response() {
        let body = r#"{
  "candidates": [
    {
      "content": {
        "parts": [
          {
            "text": "There's no single \"best\" day of the week"
          }
        ],
        "role": "model"
      },
      "finishReason": "STOP",
      "avgLogprobs": -0.3246549891964825
    }
  ],
  "usageMetadata": {
    "promptTokenCount": 7,
    "candidatesTokenCount": 207,
    "totalTokenCount": 214
  },
  "modelVersion": "gemini-1.5-flash"
}"#;
        let response: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parse_text(&response).unwrap(),
            "There's no single \"best\" day of the week"
        );
        let usage = response.usage().unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 207);
        assert_eq!(response.model_version.as_deref(), Some("gemini-1.5-flash"));
    }

    #[test]
    fn test_parse_requires_single_part() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}]
        }))
        .unwrap();
        let err = parse_text(&response).unwrap_err();
        assert!(err.to_string().ends_with("expected 1 part, got 2"), "got {err}");
        assert_eq!(response.text(), "ab");
    }

    #[test]
    fn test_parse_no_candidates() {
        let response = GenerateContentResponse::default();
        assert!(parse_text(&response).is_err());
        assert_eq!(response.text(), "");
    }

    #[test]
    fn test_stream_fragments() {
        let body = r#"[{"candidates": [{"content": {"parts": [{"text": "That"}], "role": "model"}}]}
,
{"candidates": [{"content": {"parts": [{"text": "'s a fun question"}], "role": "model"}}]}
]"#;
        let texts: Vec<String> = ArrayStream::<_, GenerateContentResponse>::new(body.as_bytes())
            .map(|chunk| chunk.unwrap().text())
            .collect();
        assert_eq!(texts, vec!["That", "'s a fun question"]);
    }

    #[test]
    fn test_request_body() {
        let request = LlmRequest {
            system_prompt: Some("be brief".to_string()),
            messages: vec!["q1".into(), "a1".into(), "q2".into()],
            json: true,
            ..LlmRequest::default()
        };
        let body = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "q1"}]},
                    {"role": "model", "parts": [{"text": "a1"}]},
                    {"role": "user", "parts": [{"text": "q2"}]},
                ],
                "systemInstruction": {"parts": [{"text": "be brief"}]},
                "generationConfig": {"responseMimeType": "application/json"},
            })
        );
    }

    #[test]
    fn test_image_request_body() {
        let image = LoadedImage {
            mime_type: "image/jpeg",
            data: vec![0xff, 0xd8, 0xff],
        };
        let request = LlmRequest::new("describe").with_image(image);
        let body = serde_json::to_value(build_request(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text": "describe"},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/"}},
                    ],
                }],
            })
        );
    }

    #[test]
    fn test_url_and_key_header() {
        let provider = GoogleProvider::new(
            None,
            Some("http://localhost:8080/v1beta/"),
            "k".to_string(),
            &HttpConfig::default(),
        )
        .unwrap();
        assert_eq!(
            provider.url("streamGenerateContent"),
            "http://localhost:8080/v1beta/models/gemini-1.5-flash:streamGenerateContent"
        );
        assert_eq!(provider.auth(), [("x-goog-api-key", "k".to_string())]);
    }

    #[test]
    fn test_transport_error_hides_key() {
        let provider = GoogleProvider::new(
            None,
            Some("http://127.0.0.1:1/v1beta"),
            "SECRET123".to_string(),
            &HttpConfig::default(),
        )
        .unwrap();

        let err = provider.complete(&LlmRequest::new("hi")).unwrap_err();
        assert!(matches!(err, LlmError::Http(_)), "got {err:?}");
        assert!(!err.to_string().contains("SECRET123"), "got {err}");

        let err = provider.stream(&LlmRequest::new("hi")).err().unwrap();
        assert!(!err.to_string().contains("SECRET123"), "got {err}");
    }
}
