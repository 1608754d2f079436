//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline processes each page. The CLI uses it to drive a
//! terminal progress bar; the HTTP service leaves it unset.
//!
//! # Example
//!
//! ```rust
//! use edgequake_bill2json::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ItemCounter {
//!     items: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for ItemCounter {
//!     fn on_page_complete(&self, _page_no: usize, _total_pages: usize, item_count: usize) {
//!         self.items.fetch_add(item_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(ItemCounter { items: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each page.
///
/// Pages are processed concurrently, so `on_page_*` may be called from
/// several tasks at once and in any page order. All methods default to
/// no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the page count is known, before any model call.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the model request is sent for a page.
    fn on_page_start(&self, page_no: usize, total_pages: usize) {
        let _ = (page_no, total_pages);
    }

    /// Called when a page reply was parsed.
    ///
    /// `item_count` is the number of raw (not deduplicated) items.
    fn on_page_complete(&self, page_no: usize, total_pages: usize, item_count: usize) {
        let _ = (page_no, total_pages, item_count);
    }

    /// Called when a page failed and will contribute no items.
    fn on_page_error(&self, page_no: usize, total_pages: usize, error: String) {
        let _ = (page_no, total_pages, error);
    }

    /// Called once after aggregation.
    fn on_extraction_complete(&self, total_pages: usize, total_item_count: usize) {
        let _ = (total_pages, total_item_count);
    }
}

/// Shared handle stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

/// A callback that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}
