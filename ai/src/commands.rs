//! Capability-checked dispatch of the `text`, `img` and `tts` commands

use anyhow::{Context, Result};
use llm_client::{Capability, LlmProvider, LlmRequest, LoadedImage};
use log::{debug, info};
use std::io::Write;
use std::path::Path;

fn require(provider: &dyn LlmProvider, capability: Capability) -> Result<()> {
    if !provider.supports(capability) {
        return Err(provider.unsupported(capability).into());
    }
    Ok(())
}

/// Answer a text prompt, streaming the reply when the backend can
pub fn run_text(
    provider: &dyn LlmProvider,
    request: &LlmRequest,
    allow_stream: bool,
    out: &mut impl Write,
) -> Result<()> {
    require(provider, Capability::Text)?;

    if allow_stream && provider.supports(Capability::StreamingText) {
        debug!("Streaming reply from {}", provider.name());
        let result = stream_to(provider, request, out);
        // Finish the line even when the stream broke off part way.
        writeln!(out)?;
        return result;
    }

    debug!("Sending request to {}", provider.name());
    let response = provider.complete(request).context("LLM request failed")?;
    if let Some(usage) = &response.usage {
        debug!(
            "Tokens: {} in, {} out ({})",
            usage.input_tokens, usage.output_tokens, response.model
        );
    }
    writeln!(out, "{}", response.content)?;
    Ok(())
}

fn stream_to(
    provider: &dyn LlmProvider,
    request: &LlmRequest,
    out: &mut impl Write,
) -> Result<()> {
    for fragment in provider.stream(request).context("LLM request failed")? {
        let fragment = fragment.context("LLM stream failed")?;
        write!(out, "{}", fragment)?;
        out.flush()?;
    }
    Ok(())
}

/// Ask a question about an image
pub fn run_image(
    provider: &dyn LlmProvider,
    image: LoadedImage,
    prompt: &str,
    out: &mut impl Write,
) -> Result<()> {
    require(provider, Capability::Vision)?;

    let request = LlmRequest::new(prompt).with_image(image);
    let response = provider.complete(&request).context("LLM request failed")?;
    writeln!(out, "{}", response.content)?;
    Ok(())
}

/// Synthesize `text` and write the audio to `out_path`
pub fn run_speech(provider: &dyn LlmProvider, text: &str, out_path: &Path) -> Result<()> {
    require(provider, Capability::Speech)?;

    let audio = provider.speak(text).context("Speech request failed")?;
    std::fs::write(out_path, audio)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;
    info!("wrote {}", out_path.display());
    Ok(())
}
