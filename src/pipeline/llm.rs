//! Generation call: one request to the vision model, no retry.
//!
//! A request is an optional image plus a prompt. Failures are surfaced to
//! the caller as-is; the user decides whether to ask again. All prompt
//! wording lives in [`crate::prompts`].

use crate::config::StudyConfig;
use crate::error::StudyError;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Raw result of one generation call.
#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// Send `prompt` (and `image`, if any) to the provider.
///
/// The message is a single user turn: the image first, then the prompt
/// text. The call is bounded by `config.api_timeout_secs`.
pub async fn generate(
    provider: &Arc<dyn LLMProvider>,
    prompt: &str,
    image: Option<ImageData>,
    config: &StudyConfig,
) -> Result<Generation, StudyError> {
    let start = Instant::now();
    let messages = build_messages(prompt, image);
    let options = build_options(config);
    let limit = Duration::from_secs(config.api_timeout_secs);

    let response = match tokio::time::timeout(limit, provider.chat(&messages, Some(&options))).await
    {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!("Generation failed: {e}");
            return Err(StudyError::external("Generation", e.to_string()));
        }
        Err(_) => {
            warn!("Generation timed out after {}s", config.api_timeout_secs);
            return Err(StudyError::external(
                "Generation",
                format!("no response within {}s", config.api_timeout_secs),
            ));
        }
    };

    let duration = start.elapsed();
    debug!(
        "Generation: {} input tokens, {} output tokens, {:?}",
        response.prompt_tokens, response.completion_tokens, duration
    );

    Ok(Generation {
        text: response.content,
        input_tokens: response.prompt_tokens,
        output_tokens: response.completion_tokens,
        duration_ms: duration.as_millis() as u64,
    })
}

fn build_messages(prompt: &str, image: Option<ImageData>) -> Vec<ChatMessage> {
    match image {
        Some(img) => vec![ChatMessage::user_with_images(prompt, vec![img])],
        None => vec![ChatMessage::user(prompt)],
    }
}

fn build_options(config: &StudyConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
