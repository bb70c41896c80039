//! Error types for the medocr library.
//!
//! Failures fall into three groups, each with its own type:
//!
//! * [`ExtractError`]: **Non-fatal**: one file or one page could not be
//!   decoded or read. Stored inside [`crate::output::ExtractionResult`] so
//!   the remaining uploads are still processed.
//!
//! * [`ApiError`]: a call to the remote model endpoint failed after the
//!   retry loop gave up (or failed in a way retrying cannot fix).
//!
//! * [`MedOcrError`]: **Fatal** for the current run: precondition
//!   failures (missing credential, too little text) and the wrapped
//!   [`ApiError`] of a failed analysis. Returned as `Err(MedOcrError)`
//!   from the top-level entry points.
//!
//! Artifact writes report their own [`PersistError`] per file; a failed
//! write never aborts a run.

use crate::output::BackendId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors returned by the top-level medocr entry points.
#[derive(Debug, Error)]
pub enum MedOcrError {
    // ── Preconditions ─────────────────────────────────────────────────────
    /// No bearer token was supplied for the remote endpoint.
    #[error("Missing API credential.\nPass --api-key, set OPENROUTER_API_KEY, or create key.txt.")]
    MissingCredential,

    /// The aggregate text is too short to be worth analysing.
    #[error("Insufficient text for analysis: got {got} characters, need at least {min}")]
    InsufficientInput { got: usize, min: usize },

    // ── Remote analysis ───────────────────────────────────────────────────
    /// The analysis request failed after all retries.
    #[error("Analysis failed: {0}")]
    AnalysisFailed(#[source] ApiError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure of the retrying API client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// HTTP 429 on every attempt.
    #[error("Rate limit exceeded after {attempts} attempts (last Retry-After: {retry_after:?})")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    /// Network error, timeout or 5xx on the final attempt.
    #[error("Request failed after {attempts} attempts: {detail}")]
    RequestFailed { attempts: u32, detail: String },

    /// The endpoint answered 200 but the first choice had no content.
    #[error("Empty response from model after {attempts} attempts")]
    EmptyResponse { attempts: u32 },

    /// A 4xx other than 429; retrying will not help.
    #[error("Request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The response body was not the expected chat-completion JSON.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// A non-fatal extraction failure for one file or page.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ExtractError {
    /// The bytes could not be decoded as an image or rasterised as a PDF.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// An OCR backend could not produce text.
    #[error("OCR backend '{backend}' failed: {detail}")]
    Backend { backend: BackendId, detail: String },
}

/// Writing one artifact to the storage directory failed.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialise '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub fn path(&self) -> &PathBuf {
        match self {
            PersistError::Io { path, .. } | PersistError::Json { path, .. } => path,
        }
    }
}
