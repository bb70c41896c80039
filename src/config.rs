//! Configuration for a medocr run.
//!
//! Every knob lives in [`PipelineConfig`], built via
//! [`PipelineConfigBuilder`]. The config is owned by the caller and handed
//! to the pipeline at construction; nothing in the library reads global
//! state or creates directories behind the caller's back (see
//! [`crate::storage::ArtifactStore::ensure_exists`]).

use crate::error::MedOcrError;
use crate::pipeline::render::RenderOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default chat-completions endpoint (OpenRouter, OpenAI-compatible).
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for the medical analysis.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Configuration for the document pipeline, the analysis submitter and the
/// result persister.
///
/// # Example
/// ```rust
/// use medocr::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(300)
///     .model("anthropic/claude-3.5-sonnet")
///     .storage_dir("/tmp/medocr")
///     .build()
///     .unwrap();
/// assert_eq!(config.render.dpi, 300);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory receiving OCR dumps, combined text and analysis artifacts.
    /// Default: `medocr_output`.
    pub storage_dir: PathBuf,

    /// Rasterisation and image preparation.
    pub render: RenderOptions,

    /// Remote endpoint settings shared by analysis and remote OCR.
    pub api: ApiConfig,

    /// Retry/backoff policy for every remote call.
    pub retry: RetryPolicy,

    /// Tesseract language code(s), e.g. `eng` or `eng+deu`. Default: `eng`.
    pub ocr_language: String,

    /// Remote OCR output shorter than this (after normalisation) triggers
    /// the local fallback. Default: 10.
    pub min_ocr_chars: usize,

    /// Aggregate text shorter than this is rejected before any network
    /// call. Default: 100.
    pub min_analysis_chars: usize,

    /// Custom system prompt for the analysis. If None, uses
    /// [`crate::prompts::CLINICAL_ANALYST_PROMPT`].
    pub system_prompt: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("medocr_output"),
            render: RenderOptions::default(),
            api: ApiConfig::default(),
            retry: RetryPolicy::default(),
            ocr_language: "eng".to_string(),
            min_ocr_chars: 10,
            min_analysis_chars: 100,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("storage_dir", &self.storage_dir)
            .field("render", &self.render)
            .field("api", &self.api)
            .field("retry", &self.retry)
            .field("ocr_language", &self.ocr_language)
            .field("min_ocr_chars", &self.min_ocr_chars)
            .field("min_analysis_chars", &self.min_analysis_chars)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Settings for the OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub endpoint: String,

    /// Model used for the medical analysis.
    pub model: String,

    /// Vision-capable model for remote OCR. `None` disables the remote
    /// backend and every page goes straight to Tesseract.
    pub vision_model: Option<String>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 4096.
    pub max_tokens: u32,

    /// Per-request timeout in seconds. Default: 120.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            vision_model: None,
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

/// Bounded exponential backoff.
///
/// The delay after failed attempt `n` (0-based) is
/// `min(base_delay * 2^n, max_delay)`: 2 s, 4 s, 8 s, … capped at 60 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. Default: 3.
    pub max_attempts: u32,
    /// Default: 2 s.
    pub base_delay: Duration,
    /// Default: 60 s.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the 0-based attempt `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage_dir = dir.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.render.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn enhance(mut self, v: bool) -> Self {
        self.config.render.enhance = v;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.render.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.render.scratch_dir = Some(dir.into());
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.api.endpoint = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.api.model = model.into();
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.api.vision_model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.api.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.api.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api.timeout_secs = secs;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn base_delay(mut self, d: Duration) -> Self {
        self.config.retry.base_delay = d;
        self
    }

    pub fn max_delay(mut self, d: Duration) -> Self {
        self.config.retry.max_delay = d;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn min_ocr_chars(mut self, n: usize) -> Self {
        self.config.min_ocr_chars = n;
        self
    }

    pub fn min_analysis_chars(mut self, n: usize) -> Self {
        self.config.min_analysis_chars = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, MedOcrError> {
        let c = &self.config;
        if c.render.dpi < 72 || c.render.dpi > 400 {
            return Err(MedOcrError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.render.dpi
            )));
        }
        if c.retry.max_attempts == 0 {
            return Err(MedOcrError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.retry.base_delay > c.retry.max_delay {
            return Err(MedOcrError::InvalidConfig(format!(
                "base delay {:?} exceeds max delay {:?}",
                c.retry.base_delay, c.retry.max_delay
            )));
        }
        if !c.api.endpoint.starts_with("http://") && !c.api.endpoint.starts_with("https://") {
            return Err(MedOcrError::InvalidConfig(format!(
                "endpoint must be an HTTP(S) URL, got '{}'",
                c.api.endpoint
            )));
        }
        if c.api.model.trim().is_empty() {
            return Err(MedOcrError::InvalidConfig("model must not be empty".into()));
        }
        if c.ocr_language.trim().is_empty() {
            return Err(MedOcrError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
