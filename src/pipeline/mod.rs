//! Pipeline stages for turning uploads into text.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested alone and a backend can be swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ ocr ──▶ normalize
//! (bytes)   (pdfium)   (tesseract / vision model)
//! ```
//!
//! 1. [`input`]: an uploaded file with its declared MIME type
//! 2. [`render`]: decode images or rasterise PDF pages in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]: PNG bytes for Tesseract and data URIs for the vision model
//! 4. [`ocr`]: remote-first text extraction with a local fallback
//! 5. [`normalize`]: deterministic whitespace and control-character cleanup

pub mod encode;
pub mod input;
pub mod normalize;
pub mod ocr;
pub mod render;
