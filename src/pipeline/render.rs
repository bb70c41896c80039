//! Page rasterisation: turn uploads into RGB bitmaps ready for OCR.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async code. Decoding and enhancing
//! a 200-DPI page is also CPU-heavy. Both paths therefore run on tokio's
//! blocking pool.
//!
//! ## Scratch files
//!
//! Uploads arrive as bytes. They are written to a [`tempfile`] scratch
//! file that pdfium opens by path; the file is owned by the blocking call
//! and removed when it returns, whether rendering succeeded or not.

use crate::error::ExtractError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Contrast boost applied when enhancement is on.
const ENHANCE_CONTRAST: f32 = 25.0;
/// Unsharp-mask sigma and threshold applied when enhancement is on.
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 2;

/// How pages are rasterised and prepared for OCR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Rendering DPI. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Maximum rendered width or height in pixels. Default: 4000.
    ///
    /// A 200-DPI render of a poster-sized page would otherwise allocate
    /// hundreds of megabytes.
    pub max_pixels: u32,

    /// Raise contrast and sharpen before OCR. Default: true.
    pub enhance: bool,

    /// Explicit pdfium shared library. If None, the system library is used.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Directory for scratch PDF copies. If None, the OS temp dir is used.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_pixels: 4000,
            enhance: true,
            pdfium_lib_path: None,
            scratch_dir: None,
        }
    }
}

impl RenderOptions {
    /// Pdfium renders at 72 points per inch.
    pub fn scale_factor(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

/// Rasterise every page of a PDF, in order.
///
/// Malformed bytes or an unavailable pdfium library yield
/// [`ExtractError::Decode`]; callers treat that as "zero pages".
pub async fn rasterize_pdf(
    bytes: &[u8],
    options: &RenderOptions,
) -> Result<Vec<DynamicImage>, ExtractError> {
    if !bytes.starts_with(b"%PDF") {
        let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(ExtractError::Decode(format!(
            "not a PDF (first bytes: {magic:?})"
        )));
    }

    let bytes = bytes.to_vec();
    let options = options.clone();

    tokio::task::spawn_blocking(move || rasterize_pdf_blocking(&bytes, &options))
        .await
        .map_err(|e| ExtractError::Decode(format!("render task panicked: {e}")))?
}

/// Decode a single uploaded image into a prepared RGB bitmap.
pub async fn decode_image(
    bytes: &[u8],
    options: &RenderOptions,
) -> Result<DynamicImage, ExtractError> {
    let bytes = bytes.to_vec();
    let enhance = options.enhance;

    tokio::task::spawn_blocking(move || {
        let img = image::load_from_memory(&bytes)
            .map_err(|e| ExtractError::Decode(format!("image decode failed: {e}")))?;
        debug!("Decoded image {}x{} px", img.width(), img.height());
        Ok(prepare_bitmap(img, enhance))
    })
    .await
    .map_err(|e| ExtractError::Decode(format!("decode task panicked: {e}")))?
}

/// Convert to RGB8 and optionally enhance for OCR.
pub fn prepare_bitmap(img: DynamicImage, enhance: bool) -> DynamicImage {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    if enhance {
        rgb.adjust_contrast(ENHANCE_CONTRAST)
            .unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD)
    } else {
        rgb
    }
}

/// Blocking implementation of PDF rasterisation.
fn rasterize_pdf_blocking(
    bytes: &[u8],
    options: &RenderOptions,
) -> Result<Vec<DynamicImage>, ExtractError> {
    // Declared first so it is dropped last, after pdfium closes the document.
    let scratch_dir = options
        .scratch_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let mut scratch = tempfile::Builder::new()
        .prefix("medocr-")
        .suffix(".pdf")
        .tempfile_in(&scratch_dir)
        .map_err(|e| ExtractError::Decode(format!("scratch file: {e}")))?;
    scratch
        .write_all(bytes)
        .and_then(|_| scratch.flush())
        .map_err(|e| ExtractError::Decode(format!("scratch file write: {e}")))?;

    let pdfium = bind_pdfium(options.pdfium_lib_path.as_deref())?;

    let document = pdfium
        .load_pdf_from_file(scratch.path(), None)
        .map_err(|e| ExtractError::Decode(format!("corrupt PDF: {e:?}")))?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(options.scale_factor())
        .set_maximum_width(options.max_pixels as i32)
        .set_maximum_height(options.max_pixels as i32);

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ExtractError::Decode(format!("rasterisation failed for page {}: {e:?}", idx + 1))
        })?;
        let image = prepare_bitmap(bitmap.as_image(), options.enhance);
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    Ok(images)
}

fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, ExtractError> {
    let bindings = match lib_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| ExtractError::Decode(format!("pdfium unavailable: {e}")))
}
