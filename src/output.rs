//! Output types produced by the pipeline, the submitter and the persister.
//!
//! Everything here is plain data: created once, never mutated afterwards,
//! and `Serialize` so the CLI can dump a whole run as JSON.

use crate::error::ExtractError;
use crate::storage::PersistOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which OCR backend produced a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// Local Tesseract engine.
    Tesseract,
    /// Remote vision-capable chat model.
    RemoteVision,
    /// Pages of one PDF were read by different backends.
    Mixed,
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendId::Tesseract => "tesseract",
            BackendId::RemoteVision => "remote-vision",
            BackendId::Mixed => "mixed",
        })
    }
}

/// Document type, decided from the declared MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Image,
    Pdf,
    Unsupported,
}

impl DocumentKind {
    /// `image/*` → Image, `application/pdf` → Pdf, anything else → Unsupported.
    ///
    /// Case-insensitive; parameters such as `; charset=…` are ignored.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if essence == "application/pdf" {
            DocumentKind::Pdf
        } else if essence.starts_with("image/") && essence.len() > "image/".len() {
            DocumentKind::Image
        } else {
            DocumentKind::Unsupported
        }
    }
}

/// Terminal status of one uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionStatus {
    Success,
    Failed,
    Unsupported,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionStatus::Success => "Success",
            ExtractionStatus::Failed => "Failed",
            ExtractionStatus::Unsupported => "Unsupported",
        })
    }
}

/// Result of processing one uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Declared upload name.
    pub filename: String,

    pub kind: DocumentKind,

    /// Extracted text; empty unless `status` is `Success`.
    pub text: String,

    /// Number of characters (not bytes) in `text`.
    pub char_count: usize,

    /// Pages found in the document (PDFs only).
    pub page_count: Option<usize>,

    /// Pages that yielded text (PDFs only).
    pub successful_pages: Option<usize>,

    /// Backend that produced `text`.
    pub backend: Option<BackendId>,

    pub status: ExtractionStatus,

    /// Why the file failed, if it did.
    pub error: Option<ExtractError>,

    /// Plain-text dump written to the artifact store, if the write succeeded.
    pub artifact: Option<PathBuf>,
}

impl ExtractionResult {
    pub(crate) fn unsupported(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            kind: DocumentKind::Unsupported,
            text: String::new(),
            char_count: 0,
            page_count: None,
            successful_pages: None,
            backend: None,
            status: ExtractionStatus::Unsupported,
            error: None,
            artifact: None,
        }
    }

    pub(crate) fn failed(filename: impl Into<String>, kind: DocumentKind, error: ExtractError) -> Self {
        Self {
            filename: filename.into(),
            kind,
            text: String::new(),
            char_count: 0,
            page_count: None,
            successful_pages: None,
            backend: None,
            status: ExtractionStatus::Failed,
            error: Some(error),
            artifact: None,
        }
    }

    pub(crate) fn succeeded(
        filename: impl Into<String>,
        kind: DocumentKind,
        text: String,
        backend: BackendId,
    ) -> Self {
        Self {
            filename: filename.into(),
            kind,
            char_count: text.chars().count(),
            text,
            page_count: None,
            successful_pages: None,
            backend: Some(backend),
            status: ExtractionStatus::Success,
            error: None,
            artifact: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Success
    }
}

/// Everything one pass of the document pipeline produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// One entry per uploaded file, in upload order.
    pub results: Vec<ExtractionResult>,

    /// Successful texts joined with per-file headers.
    pub aggregate_text: String,

    /// Where the aggregate text was written, if the write succeeded.
    pub aggregate_artifact: Option<PathBuf>,
}

impl PipelineRun {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }
}

/// Bookkeeping attached to an [`AnalysisReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    /// Model that produced the analysis.
    pub model: String,
    /// Characters of aggregate text submitted.
    pub input_chars: usize,
    /// Wall-clock time of the remote call, retries included.
    pub duration_ms: u64,
}

/// The structured medical analysis of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Aggregate-text artifact the analysis was generated from.
    pub source_reference: Option<PathBuf>,
    /// Generated analysis text, verbatim.
    pub analysis: String,
    pub metadata: ProcessingMetadata,
}

/// Outcome of [`crate::process::Analyzer::run`].
#[derive(Debug)]
pub struct AnalysisRun {
    pub pipeline: PipelineRun,
    pub report: AnalysisReport,
    pub persisted: PersistOutcome,
}
