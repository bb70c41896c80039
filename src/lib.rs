//! # medocr
//!
//! OCR medical documents and have a language model summarise them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! uploads (images, PDFs)
//!  │
//!  ├─ 1. Classify  declared MIME type: image, PDF or unsupported
//!  ├─ 2. Render    decode / rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. OCR       remote vision model first, local Tesseract fallback
//!  ├─ 4. Combine   per-file text joined under `--- <filename> ---` headers
//!  ├─ 5. Analyse   one request to an OpenAI-compatible chat endpoint,
//!  │               retried with exponential backoff
//!  └─ 6. Persist   medical_analysis_<ts>.json / .txt
//! ```
//!
//! Per-file failures never abort a run; they are recorded in each
//! [`ExtractionResult`]. Only a missing credential, too little text or
//! an exhausted retry loop surface as [`MedOcrError`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medocr::{Analyzer, NoopProgressCallback, PipelineConfig, UploadedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().storage_dir("out").build()?;
//!     let analyzer = Analyzer::from_config(&config)?;
//!     analyzer.pipeline().store().ensure_exists().await?;
//!
//!     let files = vec![UploadedFile::from_path("lab_report.pdf").await?];
//!     let key = std::env::var("OPENROUTER_API_KEY").ok();
//!     let run = analyzer.run(&files, key.as_deref(), &NoopProgressCallback).await?;
//!     println!("{}", run.report.analysis);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature     | Default | Description |
//! |-------------|---------|-------------|
//! | `cli`       | on      | Enables the `medocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `tesseract` | off     | Links libtesseract for local OCR; without it only the remote vision backend can read text |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::AnalysisSubmitter;
pub use client::{ApiClient, ChatRequest, RetryState, Sleeper, Transport};
pub use config::{ApiConfig, PipelineConfig, PipelineConfigBuilder, RetryPolicy};
pub use error::{ApiError, ExtractError, MedOcrError, PersistError};
pub use output::{
    AnalysisReport, AnalysisRun, BackendId, DocumentKind, ExtractionResult, ExtractionStatus,
    PipelineRun, ProcessingMetadata,
};
pub use pipeline::input::UploadedFile;
pub use pipeline::ocr::{OcrBackend, TextExtractor};
pub use process::{process_files_blocking, Analyzer, DocumentPipeline};
pub use progress::{NoopProgressCallback, ProgressCallback};
pub use storage::{read_report, ArtifactStore, PersistOutcome, ResultPersister};
