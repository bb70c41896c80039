//! Submission of the aggregate text for medical analysis.

use crate::client::{ApiClient, ChatRequest};
use crate::config::PipelineConfig;
use crate::error::MedOcrError;
use crate::output::{AnalysisReport, ProcessingMetadata};
use crate::prompts::{analysis_prompt, CLINICAL_ANALYST_PROMPT};
use chrono::Local;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Sends aggregate text to the analysis model and wraps the reply in an
/// [`AnalysisReport`].
///
/// Preconditions are checked before anything touches the network: a
/// missing credential wins over short input, and neither costs a request.
#[derive(Debug, Clone)]
pub struct AnalysisSubmitter {
    client: ApiClient,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    min_input_chars: usize,
}

impl AnalysisSubmitter {
    pub fn new(client: ApiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            system_prompt: CLINICAL_ANALYST_PROMPT.to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            min_input_chars: 100,
        }
    }

    pub fn from_config(config: &PipelineConfig, client: ApiClient) -> Self {
        Self {
            client,
            model: config.api.model.clone(),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| CLINICAL_ANALYST_PROMPT.to_string()),
            temperature: config.api.temperature,
            max_tokens: config.api.max_tokens,
            min_input_chars: config.min_analysis_chars,
        }
    }

    pub fn with_min_input_chars(mut self, n: usize) -> Self {
        self.min_input_chars = n;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Analyse `aggregate_text` in a single request.
    ///
    /// # Errors
    /// * [`MedOcrError::MissingCredential`] if `credential` is absent or blank.
    /// * [`MedOcrError::InsufficientInput`] if the trimmed text has fewer
    ///   than the configured minimum characters.
    /// * [`MedOcrError::AnalysisFailed`] if the remote call gives up.
    pub async fn submit(
        &self,
        aggregate_text: &str,
        credential: Option<&str>,
        source_reference: Option<PathBuf>,
    ) -> Result<AnalysisReport, MedOcrError> {
        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(MedOcrError::MissingCredential)?;

        let got = aggregate_text.trim().chars().count();
        if got < self.min_input_chars {
            return Err(MedOcrError::InsufficientInput {
                got,
                min: self.min_input_chars,
            });
        }

        let request = ChatRequest::new(&self.model)
            .system(&self.system_prompt)
            .user(analysis_prompt(aggregate_text))
            .temperature(self.temperature)
            .max_tokens(self.max_tokens);

        info!("Submitting {} chars for analysis with {}", got, self.model);
        let start = Instant::now();
        let analysis = self
            .client
            .send(&request, credential)
            .await
            .map_err(MedOcrError::AnalysisFailed)?;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!("Analysis received: {} chars in {}ms", analysis.chars().count(), duration_ms);

        Ok(AnalysisReport {
            timestamp: Local::now().to_rfc3339(),
            source_reference,
            analysis,
            metadata: ProcessingMetadata {
                model: self.model.clone(),
                input_chars: aggregate_text.chars().count(),
                duration_ms,
            },
        })
    }
}
