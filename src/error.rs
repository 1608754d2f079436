//! Error types for the edgequake-bill2json library.
//!
//! Two error types for two failure modes:
//!
//! * [`BillExtractError`]: **Fatal**: the document cannot be processed at
//!   all (download failed, not a PDF or image, provider not configured).
//!   Returned as `Err(BillExtractError)` from the `extract*` functions and
//!   surfaced by the HTTP service as `is_success: false`.
//!
//! * [`PageError`]: **Non-fatal**: a single page failed (render glitch,
//!   transient API error, unparseable model reply). Stored inside
//!   [`crate::output::PageResult`]; the page contributes zero line items and
//!   the remaining pages are still extracted.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-bill2json library.
#[derive(Debug, Error)]
pub enum BillExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid document reference '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download document '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes are neither a PDF nor a decodable image.
    #[error("Unsupported document format for '{source_name}' (first bytes: {magic:?})")]
    UnsupportedFormat { source_name: String, magic: Vec<u8> },

    /// The document was fetched but contains no bytes.
    #[error("Document '{source_name}' is empty")]
    EmptyDocument { source_name: String },

    // ── Document errors ───────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{source_name}' is corrupt: {detail}")]
    CorruptPdf { source_name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{source_name}' is encrypted and requires a password")]
    PasswordRequired { source_name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{source_name}'")]
    WrongPassword { source_name: String },

    /// The image bytes matched a known signature but could not be decoded.
    #[error("Image '{source_name}' could not be decoded: {detail}")]
    CorruptImage { source_name: String, detail: String },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillExtractError {
    /// `true` when the caller supplied something unusable (bad URL,
    /// unreachable document, unsupported or corrupt file).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillExtractError::FileNotFound { .. }
                | BillExtractError::PermissionDenied { .. }
                | BillExtractError::InvalidInput { .. }
                | BillExtractError::DownloadFailed { .. }
                | BillExtractError::DownloadTimeout { .. }
                | BillExtractError::UnsupportedFormat { .. }
                | BillExtractError::EmptyDocument { .. }
                | BillExtractError::CorruptPdf { .. }
                | BillExtractError::PasswordRequired { .. }
                | BillExtractError::WrongPassword { .. }
                | BillExtractError::CorruptImage { .. }
                | BillExtractError::PageOutOfRange { .. }
        )
    }

    /// `true` when the upstream model provider is the cause.
    pub fn is_upstream_error(&self) -> bool {
        matches!(self, BillExtractError::ProviderNotConfigured { .. })
    }
}

/// A non-fatal error for a single page.
///
/// The page keeps its slot in `pagewise_line_items` with an empty
/// `bill_items` list.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation or image encoding failed.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// LLM call failed after retries.
    #[error("Page {page}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// LLM call timed out on the final attempt.
    #[error("Page {page}: LLM call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The model answered, but not with the expected JSON shape.
    #[error("Page {page}: malformed model reply: {detail}")]
    MalformedReply { page: usize, detail: String },
}

impl PageError {
    /// The 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::LlmFailed { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::MalformedReply { page, .. } => *page,
        }
    }
}
