//! Pipeline stages for invoice line-item extraction.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ reply
//! (URL/path) (pdfium)  (base64)  (VLM)   (strict JSON)
//! ```
//!
//! 1. [`input`]: fetch the bytes and classify them as PDF or image
//! 2. [`render`]: rasterise selected PDF pages in `spawn_blocking`, or
//!    decode the image as a single page
//! 3. [`encode`]: downscale if needed, PNG-encode and base64-wrap
//! 4. [`llm`]: drive the VLM call with timeout and retry/backoff; the
//!    only stage with model I/O
//! 5. [`reply`]: clean the reply text and parse it strictly into items
//!
//! Aggregation across pages lives in [`crate::aggregate`].

pub mod encode;
pub mod input;
pub mod llm;
pub mod render;
pub mod reply;
