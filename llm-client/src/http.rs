//! Shared HTTP plumbing for the API providers
//!
//! Request tracing is a property of each provider's [`HttpConfig`], not of a
//! global client.

use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use serde::Serialize;
use serde_json::Value;

use crate::error::{LlmError, Result};

/// Transport settings handed to every provider
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    /// Log request and response headers and bodies at debug level
    pub trace_requests: bool,
    pub connect_timeout: Option<Duration>,
}

impl HttpConfig {
    pub fn traced(mut self, trace_requests: bool) -> Self {
        self.trace_requests = trace_requests;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// A configured client plus the tracing switch
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    client: Client,
    trace: bool,
}

impl Transport {
    pub(crate) fn new(config: &HttpConfig) -> Result<Self> {
        // Blocking clients default to a 30s total timeout, which streams outlive.
        let mut builder = Client::builder().timeout(None);
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            trace: config.trace_requests,
        })
    }

    /// POST a JSON body. Non-success statuses are turned into errors.
    pub(crate) fn post_json<B: Serialize>(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &B,
    ) -> Result<Response> {
        let payload = serde_json::to_vec(body)?;

        if self.trace {
            debug!(
                "> POST {}\n{}",
                url,
                String::from_utf8_lossy(&payload)
            );
        }

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send()?;

        if self.trace {
            debug!(
                "< {}\n{}",
                response.status(),
                format_headers(response.headers())
            );
        }

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let text = response.text().unwrap_or_default();
            if self.trace {
                debug!("< {}", text);
            }
            return Err(status_error(status, retry_after, &text));
        }

        Ok(response)
    }

    /// Read a whole response body as text
    pub(crate) fn read_text(&self, response: Response) -> Result<String> {
        let text = response.text()?;
        if self.trace {
            debug!("< {}", text);
        }
        Ok(text)
    }
}

/// Map a failed status and its body to an error
pub(crate) fn status_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> LlmError {
    let message = error_message(body).unwrap_or_else(|| body.to_string());

    match status.as_u16() {
        429 => LlmError::RateLimited { retry_after },
        503 => LlmError::ServerOverloaded { message },
        code => LlmError::ApiError {
            message,
            status_code: Some(code),
        },
    }
}

/// Pull a message out of `{"error": "..."}` or `{"error": {"message": "..."}}`
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(message) => Some(message.clone()),
        error => error.get("message")?.as_str().map(str::to_string),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

fn format_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("<binary>")))
        .collect::<Vec<_>>()
        .join("\n")
}
