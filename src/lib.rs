//! # edgequake-bill2json
//!
//! Extract invoice line items from PDFs and bill images using Vision
//! Language Models (VLMs), and count the unique items across pages.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input      download the URL (or read a local file), sniff the format
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode     PNG → base64 ImageData
//!  ├─ 4. VLM        one strict-JSON call per page, bounded concurrency
//!  ├─ 5. Aggregate  fuzzy name + amount deduplication across pages
//!  └─ 6. Output     {is_success, token_usage, data} envelope
//! ```
//!
//! Per-page line items are returned exactly as the model read them;
//! deduplication only affects `total_item_count`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_bill2json::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract("https://example.com/bill.pdf", &config).await?;
//!     println!("{} unique items", output.total_item_count);
//!     println!("{}", serde_json::to_string_pretty(&output.into_response())?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bill2json` binary (clap + anyhow + tracing-subscriber + dotenvy) |
//!
//! The HTTP service ([`server`]) is part of the library; only the binary
//! that starts it is behind `cli`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::{aggregate, dedupe_items, similarity, total_item_count, Aggregate, DedupConfig};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use error::{BillExtractError, PageError};
pub use extract::{
    extract, extract_from_bytes, extract_sync, extract_with_provider, resolve_provider,
};
pub use output::{
    BillItem, ExtractData, ExtractResponse, ExtractionOutput, ExtractionStats, PageResult,
    PageType, TokenUsage,
};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use server::{router, serve, AppState};
