//! Integration tests for the full upload → OCR → analysis → persistence path.
//!
//! OCR engines, HTTP and sleeping are replaced by in-process fakes, so
//! these tests need neither pdfium, libtesseract nor network access.
//!
//! Run with:
//!   RUST_LOG=medocr=debug cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use medocr::client::{HttpReply, TransportError};
use medocr::pipeline::ocr::RemoteVisionOcr;
use medocr::pipeline::render::RenderOptions;
use medocr::{
    process_files_blocking, read_report, AnalysisSubmitter, Analyzer, ApiClient, ApiError,
    ArtifactStore, BackendId, ChatRequest, DocumentPipeline, ExtractError, ExtractionStatus,
    MedOcrError, NoopProgressCallback, OcrBackend, PipelineConfig, ResultPersister, RetryPolicy,
    Sleeper, TextExtractor, Transport, UploadedFile,
};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Replies from a script, then repeats `fallback` forever.
struct FakeTransport {
    script: Mutex<VecDeque<HttpReply>>,
    fallback: HttpReply,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeTransport {
    fn new(script: Vec<HttpReply>, fallback: HttpReply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn answering(content: &str) -> Arc<Self> {
        Self::new(Vec::new(), completion(content))
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn post_json(
        &self,
        _url: &str,
        _credential: &str,
        body: &ChatRequest,
    ) -> Result<HttpReply, TransportError> {
        self.requests.lock().unwrap().push(body.clone());
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[derive(Default)]
struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

/// OCR backend that "reads" an image by looking up its width.
struct WidthOcr {
    texts: HashMap<u32, &'static str>,
}

#[async_trait]
impl OcrBackend for WidthOcr {
    fn id(&self) -> BackendId {
        BackendId::Tesseract
    }

    async fn extract(&self, image: &DynamicImage, _credential: Option<&str>) -> Result<String, ExtractError> {
        self.texts
            .get(&image.width())
            .map(|t| t.to_string())
            .ok_or_else(|| ExtractError::Backend {
                backend: BackendId::Tesseract,
                detail: "nothing legible".into(),
            })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Route library logs through the test harness; repeated calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const LAB_TEXT: &str = "Hemoglobin: 13.5 g/dL (13.0 - 17.0)\nWBC: 11.2 x10^9/L (4.0 - 10.0) HIGH";
const RX_TEXT: &str = "Amoxicillin 500 mg, three times daily for 7 days";

fn completion(content: &str) -> HttpReply {
    HttpReply {
        status: 200,
        retry_after: None,
        body: serde_json::json!({ "choices": [{ "message": { "content": content } }] }).to_string(),
    }
}

fn status(code: u16) -> HttpReply {
    HttpReply {
        status: code,
        retry_after: None,
        body: "{}".into(),
    }
}

fn png_upload(name: &str, width: u32) -> UploadedFile {
    let img = RgbImage::from_pixel(width, 8, Rgb([250, 250, 250]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    UploadedFile::new(name, "image/png", bytes)
}

fn local_ocr() -> Arc<dyn OcrBackend> {
    Arc::new(WidthOcr {
        texts: HashMap::from([(40, LAB_TEXT), (41, RX_TEXT)]),
    })
}

fn client(transport: Arc<FakeTransport>, sleeper: Arc<RecordingSleeper>) -> ApiClient {
    ApiClient::new("https://llm.test/v1/chat/completions", RetryPolicy::default(), transport, sleeper)
}

fn analyzer(dir: &Path, transport: Arc<FakeTransport>, sleeper: Arc<RecordingSleeper>) -> Analyzer {
    init_tracing();
    let store = ArtifactStore::new(dir);
    let pipeline = DocumentPipeline::new(
        RenderOptions::default(),
        TextExtractor::new(local_ocr(), None, 10),
        store.clone(),
    );
    let submitter = AnalysisSubmitter::new(client(transport, sleeper), "analysis-model");
    Analyzer::new(pipeline, submitter, ResultPersister::new(store))
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_extracts_analyses_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new(
        vec![status(429)],
        completion("## KEY FINDINGS\nWBC is HIGH."),
    );
    let sleeper = Arc::new(RecordingSleeper::default());
    let analyzer = analyzer(dir.path(), transport.clone(), sleeper.clone());

    let files = vec![
        png_upload("lab.png", 40),
        UploadedFile::new("notes.txt", "text/plain", b"ignored".to_vec()),
        png_upload("rx.png", 41),
    ];
    let run = assert_ok!(analyzer.run(&files, Some("sk-test"), &NoopProgressCallback).await);

    // Pipeline
    let statuses: Vec<_> = run.pipeline.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ExtractionStatus::Success, ExtractionStatus::Unsupported, ExtractionStatus::Success]
    );
    assert_eq!(
        run.pipeline.aggregate_text,
        format!("--- lab.png ---\n{LAB_TEXT}\n\n--- rx.png ---\n{RX_TEXT}")
    );
    let combined = run.pipeline.aggregate_artifact.as_ref().unwrap();
    assert_eq!(std::fs::read_to_string(combined).unwrap(), run.pipeline.aggregate_text);
    assert!(run.pipeline.results[0].artifact.is_some());
    assert!(run.pipeline.results[1].artifact.is_none());

    // Analysis: one 429, one backoff, then success.
    assert_eq!(transport.calls(), 2);
    assert_eq!(*sleeper.delays.lock().unwrap(), vec![Duration::from_secs(2)]);
    assert_eq!(run.report.analysis, "## KEY FINDINGS\nWBC is HIGH.");
    assert_eq!(run.report.source_reference.as_ref(), Some(combined));
    let sent = serde_json::to_string(&transport.requests.lock().unwrap()[0]).unwrap();
    assert!(sent.contains("Amoxicillin 500 mg"));

    // Persistence
    assert!(run.persisted.is_complete());
    let back = read_report(run.persisted.json.as_ref().unwrap()).await.unwrap();
    assert_eq!(back, run.report);
    let txt = std::fs::read_to_string(run.persisted.text.as_ref().unwrap()).unwrap();
    assert_eq!(txt, run.report.analysis);

    let names = files_in(dir.path());
    assert_eq!(names.iter().filter(|n| n.starts_with("ocr_")).count(), 2);
    assert_eq!(names.iter().filter(|n| n.starts_with("combined_text_")).count(), 1);
    assert_eq!(names.iter().filter(|n| n.starts_with("medical_analysis_")).count(), 2);
}

#[tokio::test]
async fn missing_credential_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::answering("unused");
    let analyzer = analyzer(dir.path(), transport.clone(), Arc::default());

    let err = assert_err!(
        analyzer
            .run(&[png_upload("lab.png", 40)], None, &NoopProgressCallback)
            .await
    );
    assert!(matches!(err, MedOcrError::MissingCredential));
    assert_eq!(transport.calls(), 0);
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn too_little_text_is_rejected_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::answering("unused");
    let analyzer = analyzer(dir.path(), transport.clone(), Arc::default());

    let files = vec![
        UploadedFile::new("notes.txt", "text/plain", b"x".to_vec()),
        png_upload("blank.png", 99),
    ];
    let err = assert_err!(analyzer.run(&files, Some("sk-test"), &NoopProgressCallback).await);
    assert!(matches!(err, MedOcrError::InsufficientInput { got: 0, min: 100 }));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn server_errors_exhaust_retries() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new(Vec::new(), status(503));
    let sleeper = Arc::new(RecordingSleeper::default());
    let analyzer = analyzer(dir.path(), transport.clone(), sleeper.clone());

    let files = vec![png_upload("lab.png", 40), png_upload("rx.png", 41)];
    let err = assert_err!(analyzer.run(&files, Some("sk-test"), &NoopProgressCallback).await);

    assert!(matches!(
        err,
        MedOcrError::AnalysisFailed(ApiError::RequestFailed { attempts: 3, .. })
    ));
    assert!(err.to_string().starts_with("Analysis failed:"));
    assert_eq!(transport.calls(), 3);
    assert_eq!(
        *sleeper.delays.lock().unwrap(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new(Vec::new(), status(401));
    let sleeper = Arc::new(RecordingSleeper::default());
    let analyzer = analyzer(dir.path(), transport.clone(), sleeper.clone());

    let files = vec![png_upload("lab.png", 40), png_upload("rx.png", 41)];
    let err = assert_err!(analyzer.run(&files, Some("sk-test"), &NoopProgressCallback).await);

    assert!(matches!(
        err,
        MedOcrError::AnalysisFailed(ApiError::Rejected { status: 401, .. })
    ));
    assert_eq!(transport.calls(), 1);
    assert!(sleeper.delays.lock().unwrap().is_empty());
}

#[tokio::test]
async fn remote_vision_reads_images_first() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::answering("Glucose: 98 mg/dL (70 - 99)");
    let remote = RemoteVisionOcr::new(client(transport.clone(), Arc::default()), "vision-model", 1024);
    let pipeline = DocumentPipeline::new(
        RenderOptions::default(),
        TextExtractor::new(local_ocr(), Some(Arc::new(remote) as Arc<dyn OcrBackend>), 10),
        ArtifactStore::new(dir.path()),
    );

    let run = pipeline
        .process_files(&[png_upload("lab.png", 40)], Some("sk-test"), &NoopProgressCallback)
        .await;

    let result = &run.results[0];
    assert_eq!(result.backend, Some(BackendId::RemoteVision));
    assert_eq!(result.text, "Glucose: 98 mg/dL (70 - 99)");

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "vision-model");
    let body = serde_json::to_value(&requests[0]).unwrap();
    let url = body["messages"][0]["content"][1]["image_url"]["url"].as_str().unwrap();
    assert!(url.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn remote_vision_failure_falls_back_to_local() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new(Vec::new(), status(400));
    let remote = RemoteVisionOcr::new(client(transport.clone(), Arc::default()), "vision-model", 1024);
    let pipeline = DocumentPipeline::new(
        RenderOptions::default(),
        TextExtractor::new(local_ocr(), Some(Arc::new(remote) as Arc<dyn OcrBackend>), 10),
        ArtifactStore::new(dir.path()),
    );

    let run = pipeline
        .process_files(&[png_upload("rx.png", 41)], Some("sk-test"), &NoopProgressCallback)
        .await;
    assert_eq!(run.results[0].backend, Some(BackendId::Tesseract));
    assert_eq!(run.results[0].text, RX_TEXT);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn progress_reports_every_file_in_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let pipeline = DocumentPipeline::new(
        RenderOptions::default(),
        TextExtractor::new(local_ocr(), None, 10),
        ArtifactStore::new(dir.path()),
    );
    let seen = Mutex::new(Vec::new());
    let progress = |done: usize, total: usize| seen.lock().unwrap().push((done, total));

    let files = vec![
        png_upload("lab.png", 40),
        UploadedFile::new("scan.pdf", "application/pdf", b"%PDF-1.7 truncated".to_vec()),
        UploadedFile::new("archive.zip", "application/zip", vec![0x50, 0x4b]),
    ];
    let run = pipeline.process_files(&files, None, &progress).await;

    assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    assert_eq!(run.results[1].status, ExtractionStatus::Failed);
    assert_eq!(run.results[2].status, ExtractionStatus::Unsupported);
    assert_eq!(run.success_count(), 1);
}

#[test]
fn blocking_wrapper_runs_without_a_runtime() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path()).unwrap();
    let config = PipelineConfig::builder()
        .storage_dir(dir.path())
        .build()
        .unwrap();

    let files = vec![UploadedFile::new("readme.md", "text/markdown", b"# hi".to_vec())];
    let run = assert_ok!(process_files_blocking(&config, &files, None, &NoopProgressCallback));

    assert_eq!(run.results.len(), 1);
    assert_eq!(run.results[0].status, ExtractionStatus::Unsupported);
    assert_eq!(run.aggregate_text, "");
}
