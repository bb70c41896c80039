//! Image encoding for the OCR backends.
//!
//! Tesseract takes an encoded image buffer; vision models take a base64
//! data URI inside the JSON request body. PNG is used for both because it
//! is lossless: JPEG artefacts around glyph edges hurt OCR accuracy far
//! more than the extra bytes cost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a bitmap as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode a bitmap as a `data:image/png;base64,…` URI.
pub fn encode_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    let png = encode_png(img)?;
    let b64 = STANDARD.encode(&png);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(format!("data:image/png;base64,{b64}"))
}
