//! Page rendering: PDF pages (via pdfium) or a single image → `DynamicImage`.
//!
//! pdfium is not async-safe, so all PDF work runs inside
//! `tokio::task::spawn_blocking`. The document is opened straight from the
//! downloaded bytes; nothing touches the file system.
//!
//! A page that pdfium fails to rasterise is reported per page so the rest of
//! the invoice is still extracted. Failing to *open* the document is fatal.

use crate::config::{ExtractionConfig, PageSelection};
use crate::error::BillExtractError;
use crate::pipeline::input::{DocumentKind, FetchedDocument};
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// One page slot: its 0-based index and the image, or why rendering failed.
pub type RenderedPage = (usize, Result<DynamicImage, String>);

/// Rendered pages of one document.
#[derive(Debug)]
pub struct RenderedDocument {
    /// Page count of the whole document (1 for an image).
    pub total_pages: usize,
    /// Selected pages in ascending index order.
    pub pages: Vec<RenderedPage>,
}

/// Render the selected pages of `doc`.
pub async fn render_document(
    doc: FetchedDocument,
    config: &ExtractionConfig,
) -> Result<RenderedDocument, BillExtractError> {
    match doc.kind {
        DocumentKind::Pdf => {
            let dpi = config.dpi;
            let max_pixels = config.max_rendered_pixels;
            let password = config.password.clone();
            let selection = config.pages.clone();

            tokio::task::spawn_blocking(move || {
                render_pdf_blocking(&doc, dpi, max_pixels, password.as_deref(), &selection)
            })
            .await
            .map_err(|e| BillExtractError::Internal(format!("Render task panicked: {}", e)))?
        }
        DocumentKind::Image(format) => {
            let selection = config.pages.clone();
            tokio::task::spawn_blocking(move || decode_image_blocking(&doc, format, &selection))
                .await
                .map_err(|e| BillExtractError::Internal(format!("Decode task panicked: {}", e)))?
        }
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system.
pub fn bind_pdfium() -> Result<Pdfium, BillExtractError> {
    let from_env = std::env::var("PDFIUM_LIB_PATH")
        .ok()
        .filter(|p| !p.is_empty())
        .map(|p| Pdfium::bind_to_library(&p));

    let bindings = match from_env {
        Some(Ok(bindings)) => Ok(bindings),
        Some(Err(e)) => Err(e),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| BillExtractError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn render_pdf_blocking(
    doc: &FetchedDocument,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
    selection: &PageSelection,
) -> Result<RenderedDocument, BillExtractError> {
    let pdfium = bind_pdfium()?;
    let source_name = doc.source_name.clone();

    let document = pdfium
        .load_pdf_from_byte_slice(&doc.bytes, password)
        .map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    BillExtractError::WrongPassword { source_name: source_name.clone() }
                } else {
                    BillExtractError::PasswordRequired { source_name: source_name.clone() }
                }
            } else {
                BillExtractError::CorruptPdf {
                    source_name: source_name.clone(),
                    detail: err_str,
                }
            }
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let indices = selected_indices(selection, total_pages)?;
    let mut results = Vec::with_capacity(indices.len());

    for idx in indices {
        let rendered = pages
            .get(idx as u16)
            .map_err(|e| format!("{:?}", e))
            .and_then(|page| {
                let render_config = render_config_for(page.width().value, dpi, max_pixels);
                let bitmap = page
                    .render_with_config(&render_config)
                    .map_err(|e| format!("{:?}", e))?;
                Ok(bitmap.as_image())
            });

        match &rendered {
            Ok(image) => debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            ),
            Err(detail) => warn!("Page {} failed to render: {}", idx + 1, detail),
        }
        results.push((idx, rendered));
    }

    Ok(RenderedDocument {
        total_pages,
        pages: results,
    })
}

/// Target width from the page's physical width at `dpi`, capped on both axes.
fn render_config_for(width_points: f32, dpi: u32, max_pixels: u32) -> PdfRenderConfig {
    let target_width = target_width_px(width_points, dpi, max_pixels);
    PdfRenderConfig::new()
        .set_target_width(target_width as i32)
        .set_maximum_height(max_pixels as i32)
}

fn target_width_px(width_points: f32, dpi: u32, max_pixels: u32) -> u32 {
    // 72 points per inch
    let at_dpi = (width_points.max(1.0) * dpi as f32 / 72.0).round() as u32;
    at_dpi.clamp(1, max_pixels)
}

fn decode_image_blocking(
    doc: &FetchedDocument,
    format: image::ImageFormat,
    selection: &PageSelection,
) -> Result<RenderedDocument, BillExtractError> {
    let indices = selected_indices(selection, 1)?;
    let image = image::load_from_memory_with_format(&doc.bytes, format).map_err(|e| {
        BillExtractError::CorruptImage {
            source_name: doc.source_name.clone(),
            detail: e.to_string(),
        }
    })?;
    info!(
        "Image loaded: {:?} {}x{} px",
        format,
        image.width(),
        image.height()
    );

    Ok(RenderedDocument {
        total_pages: 1,
        pages: indices.into_iter().map(|idx| (idx, Ok(image.clone()))).collect(),
    })
}

fn selected_indices(
    selection: &PageSelection,
    total_pages: usize,
) -> Result<Vec<usize>, BillExtractError> {
    let indices = selection.to_indices(total_pages);
    if indices.is_empty() && total_pages > 0 {
        let page = match selection {
            PageSelection::Single(p) => *p,
            PageSelection::Range(start, _) => *start,
            PageSelection::Set(pages) => pages.iter().copied().max().unwrap_or(0),
            PageSelection::All => 0,
        };
        return Err(BillExtractError::PageOutOfRange {
            page,
            total: total_pages,
        });
    }
    Ok(indices)
}
