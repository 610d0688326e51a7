//! One page image → one VLM call, with retry.
//!
//! Transient provider errors (429, 503, dropped connections) are common
//! under concurrent load. Each page retries with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`) and a per-call timeout. A page that
//! exhausts its retries is reported, not propagated, so one bad page does
//! not sink the document.

use crate::config::ExtractionConfig;
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Result of transcribing one page.
#[derive(Debug, Clone, Default)]
pub struct PageTranscript {
    /// 1-indexed.
    pub page_num: usize,
    pub markdown: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
    pub error: Option<String>,
}

pub async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    image: ImageData,
    config: &ExtractionConfig,
) -> PageTranscript {
    let start = Instant::now();
    let prompt = config.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let messages = vec![
        ChatMessage::system(prompt),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = completion_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_err = String::from("no attempt made");
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms.saturating_mul(1u64 << (attempt - 1).min(16));
            warn!("Page {}: retry {}/{} after {}ms", page_num, attempt, config.max_retries, backoff);
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "Page {}: {} in / {} out tokens in {}ms",
                    page_num,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed().as_millis()
                );
                return PageTranscript {
                    page_num,
                    markdown: response.content,
                    input_tokens: response.prompt_tokens,
                    output_tokens: response.completion_tokens,
                    retries: attempt,
                    error: None,
                };
            }
            Ok(Err(e)) => last_err = e.to_string(),
            Err(_) => last_err = format!("timed out after {}s", config.api_timeout_secs),
        }
        warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, last_err);
    }

    PageTranscript {
        page_num,
        retries: config.max_retries,
        error: Some(last_err),
        ..Default::default()
    }
}

fn completion_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}
