//! Top-level entry points: run uploads through OCR, then analyse.
//!
//! [`DocumentPipeline`] turns a batch of [`UploadedFile`]s into one
//! [`PipelineRun`]; per-file failures become data in the run, never
//! errors. [`Analyzer`] chains the pipeline, the
//! [`AnalysisSubmitter`] and the [`ResultPersister`] into the single
//! "process and analyse" action.
//!
//! Everything is awaited in sequence: one file, one page and one remote
//! request at a time.

use crate::analysis::AnalysisSubmitter;
use crate::client::ApiClient;
use crate::config::PipelineConfig;
use crate::error::{ExtractError, MedOcrError};
use crate::output::{AnalysisRun, BackendId, DocumentKind, ExtractionResult, PipelineRun};
use crate::pipeline::input::UploadedFile;
use crate::pipeline::ocr::{Extraction, TextExtractor};
use crate::pipeline::render::{self, RenderOptions};
use crate::progress::ProgressCallback;
use crate::storage::{ArtifactStore, ResultPersister};
use image::DynamicImage;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Stands in for a PDF page that yielded no text.
pub const NO_TEXT_PLACEHOLDER: &str = "[no text extracted]";

/// Runs uploads through rasterisation and text extraction.
#[derive(Clone)]
pub struct DocumentPipeline {
    render: RenderOptions,
    extractor: TextExtractor,
    store: ArtifactStore,
}

impl DocumentPipeline {
    pub fn new(render: RenderOptions, extractor: TextExtractor, store: ArtifactStore) -> Self {
        Self {
            render,
            extractor,
            store,
        }
    }

    pub fn from_config(config: &PipelineConfig, client: &ApiClient) -> Self {
        Self::new(
            config.render.clone(),
            TextExtractor::from_config(config, client),
            ArtifactStore::new(&config.storage_dir),
        )
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Process `files` in order and aggregate the text of the successful ones.
    ///
    /// Never fails: unreadable or unsupported uploads are recorded in the
    /// returned results, and artifact write failures are logged and leave
    /// the corresponding `artifact` field `None`.
    pub async fn process_files(
        &self,
        files: &[UploadedFile],
        credential: Option<&str>,
        progress: &dyn ProgressCallback,
    ) -> PipelineRun {
        let start = Instant::now();
        let total = files.len();
        info!("Processing {} file(s)", total);
        progress.on_run_start(total);

        let mut results = Vec::with_capacity(total);
        for (idx, file) in files.iter().enumerate() {
            let mut result = self.process_file(file, credential).await;

            if result.is_success() {
                match self.store.write_ocr_dump(&file.artifact_stem(), &result.text).await {
                    Ok(path) => result.artifact = Some(path),
                    Err(e) => warn!("Could not write OCR dump for {}: {}", file.name(), e),
                }
            }

            info!(
                "[{}/{}] {}: {} ({} chars)",
                idx + 1,
                total,
                result.filename,
                result.status,
                result.char_count
            );
            progress.on_file_complete(idx + 1, total);
            progress.on_file_result(&result);
            results.push(result);
        }

        let aggregate_text = aggregate_text(&results);
        let aggregate_artifact = match self.store.write_combined(&aggregate_text).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Could not write combined text: {}", e);
                None
            }
        };

        let run = PipelineRun {
            results,
            aggregate_text,
            aggregate_artifact,
        };
        info!(
            "Pipeline done: {}/{} file(s) yielded text in {}ms",
            run.success_count(),
            total,
            start.elapsed().as_millis()
        );
        progress.on_run_complete(total, run.success_count());
        run
    }

    async fn process_file(&self, file: &UploadedFile, credential: Option<&str>) -> ExtractionResult {
        match file.kind() {
            DocumentKind::Image => self.process_image(file, credential).await,
            DocumentKind::Pdf => self.process_pdf(file, credential).await,
            DocumentKind::Unsupported => {
                debug!("{}: unsupported type {}", file.name(), file.mime_type());
                ExtractionResult::unsupported(file.name())
            }
        }
    }

    async fn process_image(&self, file: &UploadedFile, credential: Option<&str>) -> ExtractionResult {
        let image = match render::decode_image(file.bytes(), &self.render).await {
            Ok(img) => img,
            Err(e) => {
                warn!("{}: {}", file.name(), e);
                return ExtractionResult::failed(file.name(), DocumentKind::Image, e);
            }
        };

        match self.extractor.extract(&image, credential).await {
            Extraction::Extracted { text, backend } => {
                ExtractionResult::succeeded(file.name(), DocumentKind::Image, text, backend)
            }
            Extraction::NoText { backend, detail } => ExtractionResult::failed(
                file.name(),
                DocumentKind::Image,
                ExtractError::Backend { backend, detail },
            ),
        }
    }

    async fn process_pdf(&self, file: &UploadedFile, credential: Option<&str>) -> ExtractionResult {
        match render::rasterize_pdf(file.bytes(), &self.render).await {
            Ok(pages) => self.extract_pages(file.name(), &pages, credential).await,
            Err(e) => {
                warn!("{}: {}", file.name(), e);
                let mut result = ExtractionResult::failed(file.name(), DocumentKind::Pdf, e);
                result.page_count = Some(0);
                result.successful_pages = Some(0);
                result
            }
        }
    }

    /// Extract every page of an already rasterised PDF, in order.
    ///
    /// Each page becomes `--- Page N ---` followed by its text, or by
    /// [`NO_TEXT_PLACEHOLDER`] when nothing could be read. The document
    /// succeeds if at least one page yielded text.
    pub async fn extract_pages(
        &self,
        filename: &str,
        pages: &[DynamicImage],
        credential: Option<&str>,
    ) -> ExtractionResult {
        let page_count = pages.len();
        let mut sections = Vec::with_capacity(page_count);
        let mut backends: Vec<BackendId> = Vec::new();
        let mut successful_pages = 0;
        let mut last_failure = None;

        for (idx, page) in pages.iter().enumerate() {
            let page_num = idx + 1;
            let body = match self.extractor.extract(page, credential).await {
                Extraction::Extracted { text, backend } => {
                    debug!(
                        "{} page {}/{}: {} chars via {}",
                        filename,
                        page_num,
                        page_count,
                        text.chars().count(),
                        backend
                    );
                    if !backends.contains(&backend) {
                        backends.push(backend);
                    }
                    successful_pages += 1;
                    text
                }
                Extraction::NoText { backend, detail } => {
                    warn!("{} page {}/{}: no text ({})", filename, page_num, page_count, detail);
                    last_failure = Some(ExtractError::Backend { backend, detail });
                    NO_TEXT_PLACEHOLDER.to_string()
                }
            };
            sections.push(format!("--- Page {page_num} ---\n{body}"));
        }

        let mut result = match backends.as_slice() {
            [] => {
                let error = last_failure
                    .unwrap_or_else(|| ExtractError::Decode("document has no pages".to_string()));
                ExtractionResult::failed(filename, DocumentKind::Pdf, error)
            }
            [only] => ExtractionResult::succeeded(filename, DocumentKind::Pdf, sections.join("\n\n"), *only),
            _ => ExtractionResult::succeeded(filename, DocumentKind::Pdf, sections.join("\n\n"), BackendId::Mixed),
        };
        result.page_count = Some(page_count);
        result.successful_pages = Some(successful_pages);
        result
    }
}

/// Join successful results, in order, as `--- <filename> ---` blocks
/// separated by a blank line.
pub fn aggregate_text(results: &[ExtractionResult]) -> String {
    results
        .iter()
        .filter(|r| r.is_success())
        .map(|r| format!("--- {} ---\n{}", r.filename, r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Synchronous wrapper around [`DocumentPipeline::process_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_files_blocking(
    config: &PipelineConfig,
    files: &[UploadedFile],
    credential: Option<&str>,
    progress: &dyn ProgressCallback,
) -> Result<PipelineRun, MedOcrError> {
    let client = ApiClient::from_config(&config.api, config.retry)?;
    let pipeline = DocumentPipeline::from_config(config, &client);
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| MedOcrError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
    Ok(runtime.block_on(pipeline.process_files(files, credential, progress)))
}

/// Pipeline, analysis and persistence in one call.
#[derive(Clone)]
pub struct Analyzer {
    pipeline: DocumentPipeline,
    submitter: AnalysisSubmitter,
    persister: ResultPersister,
}

impl Analyzer {
    pub fn new(pipeline: DocumentPipeline, submitter: AnalysisSubmitter, persister: ResultPersister) -> Self {
        Self {
            pipeline,
            submitter,
            persister,
        }
    }

    /// Wire every stage from `config`, sharing one retrying client.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, MedOcrError> {
        let client = ApiClient::from_config(&config.api, config.retry)?;
        let pipeline = DocumentPipeline::from_config(config, &client);
        let persister = ResultPersister::new(pipeline.store().clone());
        let submitter = AnalysisSubmitter::from_config(config, client);
        Ok(Self::new(pipeline, submitter, persister))
    }

    pub fn pipeline(&self) -> &DocumentPipeline {
        &self.pipeline
    }

    /// Extract text from `files`, analyse the aggregate and persist the report.
    ///
    /// # Errors
    /// [`MedOcrError::MissingCredential`] before any file is touched,
    /// [`MedOcrError::InsufficientInput`] if the files yield too little
    /// text, and [`MedOcrError::AnalysisFailed`] if the remote call gives
    /// up. Persistence failures are reported in
    /// [`AnalysisRun::persisted`], not as errors.
    pub async fn run(
        &self,
        files: &[UploadedFile],
        credential: Option<&str>,
        progress: &dyn ProgressCallback,
    ) -> Result<AnalysisRun, MedOcrError> {
        if credential.map_or(true, |c| c.trim().is_empty()) {
            return Err(MedOcrError::MissingCredential);
        }

        let pipeline = self.pipeline.process_files(files, credential, progress).await;
        let report = self
            .submitter
            .submit(
                &pipeline.aggregate_text,
                credential,
                pipeline.aggregate_artifact.clone(),
            )
            .await?;
        let persisted = self.persister.persist(&report).await;

        Ok(AnalysisRun {
            pipeline,
            report,
            persisted,
        })
    }
}
