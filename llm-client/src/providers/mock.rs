//! Mock LLM provider for testing
//!
//! Declares whatever capabilities a test needs and replays scripted output,
//! so dispatch logic can be exercised without a network.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{LlmError, Result};
use crate::provider::{Capability, LlmProvider, LlmRequest, LlmResponse, TextStream};

/// A mock provider with scripted replies
pub struct MockProvider {
    capabilities: &'static [Capability],
    /// Reply content for `complete`
    response: String,
    /// Fragments yielded by `stream`
    fragments: Vec<String>,
    /// Fail the stream with this message after all fragments
    stream_error: Option<String>,
    /// Audio returned by `speak`
    audio: Vec<u8>,
    /// Current call count
    call_count: AtomicUsize,
    /// Every request passed to `complete` or `stream`
    requests: RefCell<Vec<LlmRequest>>,
}

impl MockProvider {
    /// Create a provider that answers text requests with `response`
    pub fn new(capabilities: &'static [Capability], response: &str) -> Self {
        Self {
            capabilities,
            response: response.to_string(),
            fragments: Vec::new(),
            stream_error: None,
            audio: Vec::new(),
            call_count: AtomicUsize::new(0),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Stream these fragments instead of a single reply
    pub fn with_fragments(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Fail the stream once the scripted fragments run out
    pub fn with_stream_error(mut self, message: &str) -> Self {
        self.stream_error = Some(message.to_string());
        self
    }

    pub fn with_audio(mut self, audio: &[u8]) -> Self {
        self.audio = audio.to_vec();
        self
    }

    /// Get the number of provider calls made
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.borrow().clone()
    }

    fn record(&self, request: &LlmRequest) {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.borrow_mut().push(request.clone());
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> &'static [Capability] {
        self.capabilities
    }

    fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.record(request);
        Ok(LlmResponse {
            content: self.response.clone(),
            model: "mock-model".to_string(),
            usage: None,
        })
    }

    fn stream(&self, request: &LlmRequest) -> Result<TextStream<'_>> {
        if !self.supports(Capability::StreamingText) {
            return Err(self.unsupported(Capability::StreamingText));
        }
        self.record(request);

        let failure = self.stream_error.as_ref().map(|message| {
            Err(LlmError::StreamFormat(message.clone()))
        });
        Ok(Box::new(
            self.fragments.iter().cloned().map(Ok).chain(failure),
        ))
    }

    fn speak(&self, _text: &str) -> Result<Vec<u8>> {
        if !self.supports(Capability::Speech) {
            return Err(self.unsupported(Capability::Speech));
        }
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.audio.clone())
    }
}
