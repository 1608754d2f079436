//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! Rendered PDF pages are already capped by pdfium, but uploaded photos of
//! bills routinely arrive at 4000+ px; those are downscaled here to the same
//! `max_rendered_pixels` bound before encoding. PNG keeps digits crisp, which
//! matters more than payload size when the model must read `120.00` vs `128.00`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page image as a base64 PNG ready for the vision API.
pub fn encode_page(img: &DynamicImage, max_pixels: u32) -> Result<ImageData, image::ImageError> {
    let resized;
    let img = if img.width().max(img.height()) > max_pixels {
        resized = img.resize(max_pixels, max_pixels, FilterType::Lanczos3);
        debug!(
            "Downscaled {}x{} → {}x{}",
            img.width(),
            img.height(),
            resized.width(),
            resized.height()
        );
        &resized
    } else {
        img
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn decode(data: &ImageData) -> DynamicImage {
        let bytes = STANDARD.decode(&data.data).expect("valid base64");
        image::load_from_memory(&bytes).expect("valid png")
    }

    #[test]
    fn encode_small_image_unchanged() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img, 2000).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let back = decode(&data);
        assert_eq!((back.width(), back.height()), (10, 10));
    }

    #[test]
    fn encode_downscales_oversized_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 200, Rgba([0, 0, 0, 255])));
        let data = encode_page(&img, 100).expect("encode should succeed");
        let back = decode(&data);
        assert_eq!((back.width(), back.height()), (100, 50));
    }
}
