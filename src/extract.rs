//! Document-level extraction entry points.
//!
//! [`extract`] runs the whole pipeline for one document: fetch, render,
//! encode, concurrent per-page model calls, then aggregation. All pages are
//! collected before returning because `total_item_count` needs every page.
//!
//! The server resolves its provider once at start-up and calls
//! [`extract_with_provider`]; one-shot callers can let [`extract`] resolve
//! the provider from the config and environment.

use crate::aggregate;
use crate::config::ExtractionConfig;
use crate::error::{BillExtractError, PageError};
use crate::output::{ExtractionOutput, ExtractionStats, PageResult, TokenUsage};
use crate::pipeline::input::{self, FetchedDocument};
use crate::pipeline::{encode, llm, render};
use edgequake_llm::{ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract line items from a URL or local file.
///
/// The document is fetched and classified before the provider is resolved,
/// so input errors are reported even when no provider is configured.
///
/// # Returns
/// `Ok(ExtractionOutput)` even if some pages failed (check
/// `output.stats.failed_pages`).
///
/// # Errors
/// Returns `Err(BillExtractError)` only for fatal errors:
/// - download failed / file not found
/// - neither a PDF nor a decodable image
/// - no LLM provider could be configured
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, BillExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let doc = input::fetch_document(input_str, config.download_timeout_secs).await?;
    let provider = resolve_provider(config)?;
    extract_document(doc, &provider, config).await
}

/// Like [`extract`], with an already-constructed provider.
pub async fn extract_with_provider(
    input_str: impl AsRef<str>,
    provider: &Arc<dyn LLMProvider>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, BillExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let doc = input::fetch_document(input_str, config.download_timeout_secs).await?;
    extract_document(doc, provider, config).await
}

/// Extract line items from in-memory bytes.
///
/// `source_name` is used in logs and as the file-extension hint when the
/// bytes carry no recognisable signature.
pub async fn extract_from_bytes(
    bytes: Vec<u8>,
    source_name: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, BillExtractError> {
    let doc = input::classify(source_name, bytes)?;
    let provider = resolve_provider(config)?;
    extract_document(doc, &provider, config).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, BillExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BillExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Run render → encode → VLM → aggregate over an already-fetched document.
pub async fn extract_document(
    doc: FetchedDocument,
    provider: &Arc<dyn LLMProvider>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, BillExtractError> {
    let total_start = Instant::now();

    // ── Step 1: Render pages ─────────────────────────────────────────────
    let render_start = Instant::now();
    let rendered = render::render_document(doc, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!(
        "Rendered {} of {} pages in {}ms",
        rendered.pages.len(),
        rendered.total_pages,
        render_duration_ms
    );

    // ── Step 2: Encode images, keeping failed slots ──────────────────────
    let mut failed_early: Vec<PageResult> = Vec::new();
    let mut encoded: Vec<(usize, ImageData)> = Vec::with_capacity(rendered.pages.len());
    for (idx, image) in rendered.pages {
        let page_no = idx + 1;
        let attempt = image.and_then(|img| {
            encode::encode_page(&img, config.max_rendered_pixels)
                .map_err(|e| format!("Image encoding failed: {}", e))
        });
        match attempt {
            Ok(data) => encoded.push((page_no, data)),
            Err(detail) => {
                warn!("Page {} skipped: {}", page_no, detail);
                failed_early.push(PageResult::failed(
                    page_no,
                    PageError::RenderFailed {
                        page: page_no,
                        detail,
                    },
                ));
            }
        }
    }

    let selected = encoded.len() + failed_early.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(selected);
        for page in &failed_early {
            if let Some(ref e) = page.error {
                cb.on_page_error(page.page_no, selected, e.to_string());
            }
        }
    }

    // ── Step 3: Per-page model calls ─────────────────────────────────────
    let llm_start = Instant::now();
    let mut pages = process_concurrent(provider, encoded, selected, config).await;
    let llm_duration_ms = llm_start.elapsed().as_millis() as u64;
    pages.extend(failed_early);

    // ── Step 4: Aggregate ────────────────────────────────────────────────
    let mut output = assemble_output(pages, rendered.total_pages, config);
    output.stats.render_duration_ms = render_duration_ms;
    output.stats.llm_duration_ms = llm_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    if output.stats.processed_pages == 0 {
        warn!(
            "All {} pages failed; returning an empty result",
            output.stats.failed_pages
        );
    }

    info!(
        "Extraction complete: {}/{} pages, {} raw items → {} unique, {} tokens, {}ms",
        output.stats.processed_pages,
        selected,
        output.stats.raw_item_count,
        output.total_item_count,
        output.usage.total_tokens,
        output.stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(selected, output.total_item_count);
    }

    Ok(output)
}

/// Put pages back in order, deduplicate, and sum usage.
///
/// Durations in the returned stats are left at zero for the caller to fill.
pub fn assemble_output(
    mut pages: Vec<PageResult>,
    total_pages: usize,
    config: &ExtractionConfig,
) -> ExtractionOutput {
    pages.sort_by_key(|p| p.page_no);

    let aggregate = aggregate::aggregate(&pages, &config.dedup);
    let usage: TokenUsage = pages.iter().map(|p| p.usage).sum();
    let failed = pages.iter().filter(|p| p.error.is_some()).count();

    let stats = ExtractionStats {
        total_pages,
        processed_pages: pages.len() - failed,
        failed_pages: failed,
        raw_item_count: aggregate.raw_item_count,
        ..ExtractionStats::default()
    };
    let total_item_count = aggregate.total_item_count();

    ExtractionOutput {
        pages,
        unique_items: aggregate.unique_items,
        total_item_count,
        usage,
        stats,
    }
}

/// Process pages concurrently, at most `config.concurrency` in flight.
///
/// Results arrive in completion order; [`assemble_output`] restores page order.
async fn process_concurrent(
    provider: &Arc<dyn LLMProvider>,
    pages: Vec<(usize, ImageData)>,
    total_pages: usize,
    config: &ExtractionConfig,
) -> Vec<PageResult> {
    stream::iter(pages.into_iter().map(|(page_no, img)| {
        let provider = Arc::clone(provider);
        async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_start(page_no, total_pages);
            }
            let result = llm::process_page(&provider, page_no, img, config).await;
            if let Some(ref cb) = config.progress_callback {
                match &result.error {
                    None => cb.on_page_complete(page_no, total_pages, result.bill_items.len()),
                    Some(e) => cb.on_page_error(page_no, total_pages, e.to_string()),
                }
            }
            result
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Default model when a provider is named without one.
pub fn default_model_for(provider_name: &str) -> &'static str {
    match provider_name {
        "gemini" | "google" | "vertexai" => "gemini-2.5-flash",
        "anthropic" => "claude-sonnet-4-20250514",
        "ollama" | "lmstudio" => "llava",
        "mistral" => "pixtral-12b-2409",
        _ => "gpt-4.1-nano",
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, BillExtractError> {
    debug!("Creating provider '{}' with model '{}'", provider_name, model);
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BillExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model` or
///    [`default_model_for`] the provider.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **`OPENAI_API_KEY`** present → openai.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, BillExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model_for(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(default_model_for("openai"));
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BillExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
