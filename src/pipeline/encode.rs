//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! Vision APIs accept images as base64 payloads embedded in the JSON request
//! body. PNG is chosen over JPEG because it is lossless — text crispness
//! matters far more than file size for OCR accuracy. `detail: "high"` keeps
//! the full image-tile budget so fine print and small tables stay readable.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use tracing::debug;

use crate::error::EngineError;

/// Encode a page or figure image as a base64 PNG ready for a vision API.
pub fn encode_image(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let b64 = encode_png_base64(img)?;
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode an image as a raw base64 PNG string (the Ollama `images` field
/// takes bare base64 rather than a data URI).
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!("encoded image -> {} bytes base64", b64.len());
    Ok(b64)
}

/// Encoding failure surfaced as a page-local engine error.
pub fn encode_error(engine: &str, e: image::ImageError) -> EngineError {
    EngineError::Backend {
        engine: engine.to_string(),
        detail: format!("image encoding failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_image(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert!(!data.data.is_empty());
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[test]
    fn bare_base64_has_no_data_uri_prefix() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let b64 = encode_png_base64(&img).unwrap();
        assert!(!b64.starts_with("data:"));
        assert!(STANDARD.decode(&b64).is_ok());
    }
}
