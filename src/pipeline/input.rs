//! Input resolution: fetch the document bytes and classify them.
//!
//! The service receives a URL; the CLI also accepts a local path. Either way
//! the whole document is held in memory (invoices are small) and classified
//! by magic bytes, falling back to the URL's file extension only when the
//! bytes are inconclusive.

use crate::error::BillExtractError;
use image::ImageFormat;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// What the fetched bytes turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(ImageFormat),
}

/// A fetched document ready for rendering.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// URL or path, used in logs and error messages.
    pub source_name: String,
    pub bytes: Vec<u8>,
    pub kind: DocumentKind,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Fetch `input` (URL or local path) and classify it.
pub async fn fetch_document(
    input: &str,
    timeout_secs: u64,
) -> Result<FetchedDocument, BillExtractError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    classify(input, bytes)
}

/// Classify already-fetched bytes. `source_name` doubles as the extension hint.
pub fn classify(source_name: &str, bytes: Vec<u8>) -> Result<FetchedDocument, BillExtractError> {
    if bytes.is_empty() {
        return Err(BillExtractError::EmptyDocument {
            source_name: source_name.to_string(),
        });
    }

    let kind = detect_kind(&bytes, source_name).ok_or_else(|| {
        BillExtractError::UnsupportedFormat {
            source_name: source_name.to_string(),
            magic: bytes.iter().take(8).copied().collect(),
        }
    })?;
    debug!("Classified '{}' as {:?}", source_name, kind);

    Ok(FetchedDocument {
        source_name: source_name.to_string(),
        bytes,
        kind,
    })
}

fn detect_kind(bytes: &[u8], source_name: &str) -> Option<DocumentKind> {
    // Image signatures sit at offset 0, so they win over a `%PDF-` that merely
    // appears in the first KiB (e.g. inside PNG text chunks).
    if let Ok(format) = image::guess_format(bytes) {
        return Some(DocumentKind::Image(format));
    }
    // Some generators emit junk before the header; pdfium tolerates up to 1 KiB.
    let head = &bytes[..bytes.len().min(1024)];
    if head.windows(5).any(|w| w == b"%PDF-") {
        return Some(DocumentKind::Pdf);
    }
    match extension_of(source_name).as_deref() {
        Some("pdf") => Some(DocumentKind::Pdf),
        Some(ext) => ImageFormat::from_extension(ext).map(DocumentKind::Image),
        None => None,
    }
}

/// Lower-cased extension of the last path segment, ignoring any query string.
fn extension_of(source_name: &str) -> Option<String> {
    let path = match reqwest::Url::parse(source_name) {
        Ok(url) if is_url(source_name) => url.path().to_string(),
        _ => source_name.to_string(),
    };
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, BillExtractError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local document: {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            Err(BillExtractError::PermissionDenied { path })
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Err(BillExtractError::FileNotFound { path }),
        Err(_) => Err(BillExtractError::InvalidInput {
            input: path_str.to_string(),
        }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, BillExtractError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BillExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            BillExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            BillExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;

    if !response.status().is_success() {
        return Err(BillExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::{Cursor, Write};

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/bill.pdf"));
        assert!(is_url("http://example.com/bill.png"));
        assert!(!is_url("/tmp/bill.pdf"));
        assert!(!is_url("bill.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn classifies_pdf_by_magic() {
        let doc = classify("https://x.test/download?id=7", b"%PDF-1.7\n...".to_vec()).unwrap();
        assert_eq!(doc.kind, DocumentKind::Pdf);
    }

    #[test]
    fn classifies_pdf_with_leading_junk() {
        let mut bytes = b"\r\n\r\n".to_vec();
        bytes.extend_from_slice(b"%PDF-1.4");
        assert_eq!(classify("a", bytes).unwrap().kind, DocumentKind::Pdf);
    }

    #[test]
    fn png_containing_pdf_marker_stays_png() {
        let mut bytes = png_bytes();
        assert!(bytes.len() < 1000);
        bytes.extend_from_slice(b"%PDF-1.7 trailing bytes after IEND");
        let doc = classify("scan.png", bytes).unwrap();
        assert_eq!(doc.kind, DocumentKind::Image(ImageFormat::Png));
    }

    #[test]
    fn classifies_png_by_magic_despite_pdf_extension() {
        let doc = classify("https://x.test/bill.pdf", png_bytes()).unwrap();
        assert_eq!(doc.kind, DocumentKind::Image(ImageFormat::Png));
    }

    #[test]
    fn falls_back_to_extension() {
        let doc = classify("https://x.test/files/Bill.PDF?sig=abc", b"garbage".to_vec()).unwrap();
        assert_eq!(doc.kind, DocumentKind::Pdf);
    }

    #[test]
    fn rejects_unknown_bytes() {
        let err = classify("https://x.test/notes", b"hello world".to_vec()).unwrap_err();
        match err {
            BillExtractError::UnsupportedFormat { magic, .. } => assert_eq!(magic, b"hello wo"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_document() {
        assert!(matches!(
            classify("x.pdf", Vec::new()),
            Err(BillExtractError::EmptyDocument { .. })
        ));
    }

    #[test]
    fn extension_of_handles_urls_and_paths() {
        assert_eq!(extension_of("https://a.test/b/c.JPG?x=1").as_deref(), Some("jpg"));
        assert_eq!(extension_of("/tmp/scan.tiff").as_deref(), Some("tiff"));
        assert_eq!(extension_of("https://a.test/b/c").as_deref(), None);
    }

    #[tokio::test]
    async fn fetches_local_file() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(&png_bytes()).unwrap();
        let doc = fetch_document(tmp.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(doc.kind, DocumentKind::Image(ImageFormat::Png));
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let err = fetch_document("/definitely/not/here/bill.pdf", 5).await.unwrap_err();
        assert!(matches!(err, BillExtractError::FileNotFound { .. }));
    }
}
