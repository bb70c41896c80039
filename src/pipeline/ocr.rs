//! Text extraction from a single bitmap.
//!
//! Backends implement [`OcrBackend`]; which ones run, and in what order,
//! is decided once by [`TextExtractor`] rather than by conditionals
//! scattered through the pipeline.
//!
//! ## Selection policy
//!
//! ```text
//! remote configured && credential? ──yes──▶ remote ──≥ min chars──▶ done
//!          │                                  │
//!          no                         error / too short
//!          ▼                                  ▼
//!        local ◀──────────────────────────────┘
//!          │
//!     text? ──no──▶ NoText
//! ```
//!
//! The fallback only runs remote → local, and every path that does not
//! return remote text ends with exactly one local attempt.

use crate::client::{ApiClient, ChatRequest};
use crate::config::PipelineConfig;
use crate::error::ExtractError;
use crate::output::BackendId;
use crate::pipeline::encode;
use crate::pipeline::normalize::normalize_text;
use crate::prompts::TRANSCRIPTION_PROMPT;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, warn};

/// An interchangeable text-extraction implementation.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Read the text in `image`. `credential` is the bearer token for
    /// backends that call a remote service.
    async fn extract(&self, image: &DynamicImage, credential: Option<&str>) -> Result<String, ExtractError>;
}

/// Outcome of [`TextExtractor::extract`]. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Extracted { text: String, backend: BackendId },
    /// Every backend failed or returned nothing. `backend` is the one tried last.
    NoText { backend: BackendId, detail: String },
}

// ── Local Tesseract ──────────────────────────────────────────────────────

/// Local Tesseract engine.
#[derive(Debug, Clone)]
pub struct LocalOcr {
    language: String,
}

impl LocalOcr {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

#[async_trait]
impl OcrBackend for LocalOcr {
    fn id(&self) -> BackendId {
        BackendId::Tesseract
    }

    async fn extract(&self, image: &DynamicImage, _credential: Option<&str>) -> Result<String, ExtractError> {
        let backend_err = |detail: String| ExtractError::Backend {
            backend: BackendId::Tesseract,
            detail,
        };

        let png = encode::encode_png(image).map_err(|e| backend_err(format!("PNG encoding failed: {e}")))?;
        let language = self.language.clone();

        tokio::task::spawn_blocking(move || run_tesseract(&png, &language))
            .await
            .map_err(|e| backend_err(format!("OCR task panicked: {e}")))?
            .map_err(backend_err)
    }
}

#[cfg(feature = "tesseract")]
fn run_tesseract(png: &[u8], language: &str) -> Result<String, String> {
    use tesseract::Tesseract;

    let mut tess = Tesseract::new(None, Some(language))
        .map_err(|e| format!("initialisation failed: {e}"))?
        .set_image_from_mem(png)
        .map_err(|e| format!("could not load image: {e}"))?;
    tess.get_text()
        .map_err(|e| format!("recognition failed: {e}"))
}

#[cfg(not(feature = "tesseract"))]
fn run_tesseract(_png: &[u8], _language: &str) -> Result<String, String> {
    Err("built without tesseract support (enable the `tesseract` feature)".to_string())
}

// ── Remote vision model ──────────────────────────────────────────────────

/// Vision-capable chat model reached through the retrying client.
#[derive(Debug, Clone)]
pub struct RemoteVisionOcr {
    client: ApiClient,
    model: String,
    max_tokens: u32,
}

impl RemoteVisionOcr {
    pub fn new(client: ApiClient, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl OcrBackend for RemoteVisionOcr {
    fn id(&self) -> BackendId {
        BackendId::RemoteVision
    }

    async fn extract(&self, image: &DynamicImage, credential: Option<&str>) -> Result<String, ExtractError> {
        let backend_err = |detail: String| ExtractError::Backend {
            backend: BackendId::RemoteVision,
            detail,
        };

        let credential = credential
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| backend_err("no credential".to_string()))?;
        let data_uri =
            encode::encode_data_uri(image).map_err(|e| backend_err(format!("PNG encoding failed: {e}")))?;

        let request = ChatRequest::new(&self.model)
            .user_with_image(TRANSCRIPTION_PROMPT, data_uri)
            .temperature(0.0)
            .max_tokens(self.max_tokens);

        self.client
            .send(&request, credential)
            .await
            .map_err(|e| backend_err(e.to_string()))
    }
}

// ── Backend selection ────────────────────────────────────────────────────

/// Runs the configured backends under the remote-first, local-fallback policy.
#[derive(Clone)]
pub struct TextExtractor {
    local: Arc<dyn OcrBackend>,
    remote: Option<Arc<dyn OcrBackend>>,
    min_remote_chars: usize,
}

impl TextExtractor {
    pub fn new(
        local: Arc<dyn OcrBackend>,
        remote: Option<Arc<dyn OcrBackend>>,
        min_remote_chars: usize,
    ) -> Self {
        Self {
            local,
            remote,
            min_remote_chars,
        }
    }

    /// Tesseract locally, plus the remote vision backend when
    /// `config.api.vision_model` is set.
    pub fn from_config(config: &PipelineConfig, client: &ApiClient) -> Self {
        let local: Arc<dyn OcrBackend> = Arc::new(LocalOcr::new(&config.ocr_language));
        let remote = config.api.vision_model.as_ref().map(|model| {
            Arc::new(RemoteVisionOcr::new(client.clone(), model, config.api.max_tokens))
                as Arc<dyn OcrBackend>
        });
        Self::new(local, remote, config.min_ocr_chars)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Extract normalised text from `image`.
    pub async fn extract(&self, image: &DynamicImage, credential: Option<&str>) -> Extraction {
        let credential = credential.filter(|c| !c.trim().is_empty());

        if let (Some(remote), Some(cred)) = (&self.remote, credential) {
            match remote.extract(image, Some(cred)).await {
                Ok(raw) => {
                    let text = normalize_text(&raw);
                    let len = text.chars().count();
                    if len >= self.min_remote_chars {
                        return Extraction::Extracted {
                            text,
                            backend: remote.id(),
                        };
                    }
                    debug!(
                        "Remote OCR returned {} chars (< {}); falling back to {}",
                        len,
                        self.min_remote_chars,
                        self.local.id()
                    );
                }
                Err(e) => warn!("Remote OCR failed, falling back to {}: {}", self.local.id(), e),
            }
        }

        match self.local.extract(image, None).await {
            Ok(raw) => {
                let text = normalize_text(&raw);
                if text.is_empty() {
                    Extraction::NoText {
                        backend: self.local.id(),
                        detail: format!("{} found no text", self.local.id()),
                    }
                } else {
                    Extraction::Extracted {
                        text,
                        backend: self.local.id(),
                    }
                }
            }
            Err(e) => {
                warn!("Local OCR failed: {}", e);
                Extraction::NoText {
                    backend: self.local.id(),
                    detail: e.to_string(),
                }
            }
        }
    }
}
