//! VLM interaction: send one page image, get its line items back.
//!
//! Prompt text lives in [`crate::prompts`] and reply parsing in
//! [`super::reply`]; this module owns only the call itself: message layout,
//! per-call timeout, and retry with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`).
//!
//! Only transport failures and timeouts are retried. A reply that arrives but
//! does not parse is final for that page: at temperature 0 the model would
//! most likely repeat itself, and the tokens are already spent.

use crate::config::ExtractionConfig;
use crate::error::PageError;
use crate::output::{PageResult, TokenUsage};
use crate::pipeline::reply::parse_reply;
use crate::prompts::{DEFAULT_EXTRACTION_PROMPT, PAGE_INSTRUCTION};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Extract the line items of a single page via the VLM.
///
/// Always returns a `PageResult`; failures are recorded in `result.error`
/// with an empty item list so one bad page never aborts the document.
pub async fn process_page(
    provider: &Arc<dyn LLMProvider>,
    page_no: usize,
    image_data: ImageData,
    config: &ExtractionConfig,
) -> PageResult {
    let start = Instant::now();
    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_EXTRACTION_PROMPT);

    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_with_images(PAGE_INSTRUCTION, vec![image_data]),
    ];
    let options = build_options(config);
    let call_timeout = Duration::from_secs(config.api_timeout_secs);

    let mut last_err: Option<PageError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_no, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(call_timeout, provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => {
                let usage = TokenUsage::new(
                    response.prompt_tokens as u64,
                    response.completion_tokens as u64,
                );
                debug!(
                    "Page {}: {} input tokens, {} output tokens, {:?}",
                    page_no,
                    usage.input_tokens,
                    usage.output_tokens,
                    start.elapsed()
                );

                let mut result = page_from_reply(page_no, &response.content);
                result.usage = usage;
                result.duration_ms = start.elapsed().as_millis() as u64;
                result.retries = attempt as u8;
                return result;
            }
            Ok(Err(e)) => {
                let detail = format!("{}", e);
                warn!("Page {}: attempt {} failed: {}", page_no, attempt + 1, detail);
                last_err = Some(PageError::LlmFailed {
                    page: page_no,
                    retries: config.max_retries as u8,
                    detail,
                });
            }
            Err(_) => {
                warn!(
                    "Page {}: attempt {} timed out after {}s",
                    page_no,
                    attempt + 1,
                    config.api_timeout_secs
                );
                last_err = Some(PageError::Timeout {
                    page: page_no,
                    secs: config.api_timeout_secs,
                });
            }
        }
    }

    // All retries exhausted
    let error = last_err.unwrap_or_else(|| PageError::LlmFailed {
        page: page_no,
        retries: config.max_retries as u8,
        detail: "Unknown error".to_string(),
    });
    let mut result = PageResult::failed(page_no, error);
    result.duration_ms = start.elapsed().as_millis() as u64;
    result.retries = config.max_retries as u8;
    result
}

/// Turn raw reply text into a page result, failing closed on bad JSON.
pub fn page_from_reply(page_no: usize, reply: &str) -> PageResult {
    match parse_reply(reply) {
        Ok(parsed) => {
            debug!(
                "Page {}: {} ({} items)",
                page_no,
                parsed.page_type,
                parsed.items.len()
            );
            PageResult::new(page_no, parsed.page_type, parsed.items)
        }
        Err(e) => {
            warn!("Page {}: discarding reply: {}", page_no, e);
            PageResult::failed(
                page_no,
                PageError::MalformedReply {
                    page: page_no,
                    detail: e.to_string(),
                },
            )
        }
    }
}

fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PageType;

    #[test]
    fn build_options_defaults() {
        let config = ExtractionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(u64::MAX, 5), u64::MAX);
    }

    #[test]
    fn good_reply_becomes_page() {
        let page = page_from_reply(
            2,
            r#"{"page_type": "Final Bill", "items": [{"item_name": "CBC", "quantity": 1, "rate": 450, "amount": 450}]}"#,
        );
        assert_eq!(page.page_no, 2);
        assert_eq!(page.page_type, PageType::FinalBill);
        assert_eq!(page.bill_items.len(), 1);
        assert!(page.error.is_none());
    }

    #[test]
    fn bad_reply_fails_closed() {
        let page = page_from_reply(3, "Sorry, the image is blurry.");
        assert_eq!(page.page_no, 3);
        assert!(page.bill_items.is_empty());
        assert_eq!(page.page_type, PageType::BillDetail);
        assert!(matches!(page.error, Some(PageError::MalformedReply { page: 3, .. })));
    }
}
