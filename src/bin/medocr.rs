//! CLI binary for medocr.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, loads the API key and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use medocr::{
    Analyzer, ExtractionResult, ExtractionStatus, NoopProgressCallback, PipelineConfig,
    PipelineRun, ProgressCallback, UploadedFile,
};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over uploaded files with one status line per file.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("OCR");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
    }

    fn on_file_complete(&self, completed: usize, _total: usize) {
        self.bar.set_position(completed as u64);
    }

    fn on_file_result(&self, result: &ExtractionResult) {
        self.bar.println(status_line(result));
    }

    fn on_run_complete(&self, total_files: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let mark = if success_count == total_files {
            green("✔")
        } else if success_count == 0 {
            red("✘")
        } else {
            yellow("⚠")
        };
        eprintln!(
            "{} {}/{} files yielded text",
            mark,
            bold(&success_count.to_string()),
            total_files
        );
    }
}

fn status_line(result: &ExtractionResult) -> String {
    let mark = match result.status {
        ExtractionStatus::Success => green("✓"),
        ExtractionStatus::Failed => red("✗"),
        ExtractionStatus::Unsupported => yellow("–"),
    };
    let mut detail = format!("{:>6} chars", result.char_count);
    if let (Some(ok), Some(total)) = (result.successful_pages, result.page_count) {
        detail.push_str(&format!("  {ok}/{total} pages"));
    }
    if let Some(backend) = result.backend {
        detail.push_str(&format!("  via {backend}"));
    }
    if let Some(err) = &result.error {
        detail.push_str(&format!("  {err}"));
    }
    format!("  {} {:<32} {}", mark, result.filename, dim(&detail))
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a lab report and a prescription photo
  medocr lab_report.pdf prescription.jpg

  # OCR only, no API call
  medocr --extract-only scan.png

  # Use a vision model for OCR with Tesseract as fallback
  medocr --vision-model openai/gpt-4o lab_report.pdf

  # Machine-readable output
  medocr --json lab_report.pdf > run.json

API KEY (first match wins):
  --api-key <KEY>
  OPENROUTER_API_KEY environment variable
  key file (--key-file, default ./key.txt), if it exists

ARTIFACTS (written to --output-dir):
  ocr_<name>_<timestamp>.txt           text of each readable upload
  combined_text_<timestamp>.txt        text sent for analysis
  medical_analysis_<timestamp>.json    analysis with metadata
  medical_analysis_<timestamp>.txt     analysis text only
"#;

/// Extract text from medical documents and analyse it with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "medocr",
    version,
    about = "OCR medical images and PDFs, then summarise them with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image or PDF files to process, in order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// API key for the chat-completions endpoint.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// File holding the API key, read if it exists and no key was given.
    #[arg(long, env = "MEDOCR_KEY_FILE", default_value = "key.txt")]
    key_file: PathBuf,

    /// OpenAI-compatible chat-completions URL.
    #[arg(long, env = "MEDOCR_ENDPOINT")]
    endpoint: Option<String>,

    /// Model for the medical analysis.
    #[arg(long, env = "MEDOCR_MODEL")]
    model: Option<String>,

    /// Vision model for remote OCR. Without it only Tesseract is used.
    #[arg(long, env = "MEDOCR_VISION_MODEL")]
    vision_model: Option<String>,

    /// Rendering DPI for PDF pages (72–400).
    #[arg(long, env = "MEDOCR_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Skip contrast and sharpening before OCR.
    #[arg(long, env = "MEDOCR_NO_ENHANCE")]
    no_enhance: bool,

    /// Tesseract language code(s), e.g. eng or eng+deu.
    #[arg(long, env = "MEDOCR_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Explicit pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Directory receiving all artifacts.
    #[arg(short, long, env = "MEDOCR_OUTPUT_DIR", default_value = "medocr_output")]
    output_dir: PathBuf,

    /// Total attempts per API request, the first included.
    #[arg(long, env = "MEDOCR_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Path to a text file containing a custom analysis system prompt.
    #[arg(long, env = "MEDOCR_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Stop after OCR; no analysis request is made.
    #[arg(long)]
    extract_only: bool,

    /// Print the whole run as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "MEDOCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let analyzer = Analyzer::from_config(&config).context("Failed to initialise pipeline")?;
    analyzer
        .pipeline()
        .store()
        .ensure_exists()
        .await
        .context("Failed to create output directory")?;

    let credential = load_credential(cli.api_key.as_deref(), &cli.key_file).await?;

    // ── Load inputs ──────────────────────────────────────────────────────
    let mut files = Vec::with_capacity(cli.inputs.len());
    for path in &cli.inputs {
        files.push(
            UploadedFile::from_path(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    let cli_progress;
    let progress: &dyn ProgressCallback = if show_progress {
        cli_progress = CliProgressCallback::new();
        &cli_progress
    } else {
        &NoopProgressCallback
    };

    // ── Extract only ─────────────────────────────────────────────────────
    if cli.extract_only {
        let run = analyzer
            .pipeline()
            .process_files(&files, credential.as_deref(), progress)
            .await;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&run).context("Failed to serialise output")?
            );
        } else {
            print_pipeline_summary(&run, &cli, show_progress);
            println!("{}", run.aggregate_text);
        }
        return Ok(());
    }

    // ── Full analysis ────────────────────────────────────────────────────
    let run = analyzer
        .run(&files, credential.as_deref(), progress)
        .await
        .context("Analysis run failed")?;

    if cli.json {
        let out = serde_json::json!({
            "pipeline": run.pipeline,
            "report": run.report,
            "artifacts": {
                "json": run.persisted.json.as_ref().ok(),
                "text": run.persisted.text.as_ref().ok(),
            },
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("Failed to serialise output")?
        );
        return Ok(());
    }

    print_pipeline_summary(&run.pipeline, &cli, show_progress);
    println!("{}", run.report.analysis);

    if !cli.quiet {
        for (label, outcome) in [("JSON", &run.persisted.json), ("Text", &run.persisted.text)] {
            match outcome {
                Ok(path) => eprintln!("{} {label} saved to {}", green("✔"), bold(&path.display().to_string())),
                Err(e) => eprintln!("{} {label} not saved: {e}", red("✘")),
            }
        }
        eprintln!(
            "   {} chars analysed by {} in {}ms",
            dim(&run.report.metadata.input_chars.to_string()),
            run.report.metadata.model,
            run.report.metadata.duration_ms
        );
    }

    Ok(())
}

/// Per-file lines when no progress bar printed them, plus the combined-text path.
fn print_pipeline_summary(run: &PipelineRun, cli: &Cli, show_progress: bool) {
    if cli.quiet {
        return;
    }
    if !show_progress {
        for result in &run.results {
            eprintln!("{}", status_line(result));
        }
    }
    if let Some(path) = &run.aggregate_artifact {
        eprintln!("{} Combined text saved to {}", green("✔"), bold(&path.display().to_string()));
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .storage_dir(&cli.output_dir)
        .dpi(cli.dpi)
        .enhance(!cli.no_enhance)
        .ocr_language(&cli.ocr_lang)
        .max_attempts(cli.max_attempts);

    if let Some(endpoint) = &cli.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(model) = &cli.vision_model {
        builder = builder.vision_model(model);
    }
    if let Some(lib) = &cli.pdfium_lib {
        builder = builder.pdfium_lib_path(lib);
    }
    if let Some(path) = &cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

/// An explicit key wins; otherwise the key file is read if it exists.
async fn load_credential(explicit: Option<&str>, key_file: &Path) -> Result<Option<String>> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(Some(key.to_string()));
    }
    if !tokio::fs::try_exists(key_file).await.unwrap_or(false) {
        return Ok(None);
    }
    let key = tokio::fs::read_to_string(key_file)
        .await
        .with_context(|| format!("Failed to read API key from {}", key_file.display()))?;
    let key = key.trim();
    Ok((!key.is_empty()).then(|| key.to_string()))
}
