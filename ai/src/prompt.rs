//! Prompt input helpers

use anyhow::{Context, Result, bail};
use llm_client::LlmRequest;
use std::io::Read;

/// Split multi-shot input into alternating user/assistant turns.
///
/// The first line (with its newline) is the separator; the remainder is split
/// on it. Turns are trimmed and empty ones dropped, but the even-count rule
/// applies to the raw pieces.
pub fn parse_multi(multi: &str) -> Result<Vec<String>> {
    let Some(newline) = multi.find('\n') else {
        bail!("expected separator as first line of multi");
    };
    let (sep, rest) = multi.split_at(newline + 1);

    let parts: Vec<&str> = rest.split(sep).collect();
    let prompts = parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();

    if parts.len() < 2 {
        bail!("didn't find separator {:?} in prompt", sep);
    }
    if parts.len() % 2 != 0 {
        bail!("expected even number of parts in multi");
    }
    Ok(prompts)
}

/// Assemble the `text` request: multi-shot turns first, then the prompt
pub fn text_request(
    sys: String,
    multi: Option<&str>,
    prompt: String,
    json: bool,
) -> Result<LlmRequest> {
    if sys.trim().is_empty() {
        bail!("specify --sys");
    }

    let mut messages = match multi {
        Some(multi) => parse_multi(multi)?,
        None => Vec::new(),
    };
    messages.push(prompt);

    Ok(LlmRequest {
        system_prompt: Some(sys),
        messages,
        json,
        ..LlmRequest::default()
    })
}

/// Return `arg`, or everything from `stdin` when `arg` is `-`
pub fn arg_or_stdin(arg: &str, mut stdin: impl Read) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }

    let mut buf = String::new();
    stdin
        .read_to_string(&mut buf)
        .context("Failed to read prompt from stdin")?;
    Ok(buf)
}
