//! Durable artifacts: OCR dumps, combined text and analysis results.
//!
//! All files land in one caller-owned directory. Creating that directory is
//! an explicit, idempotent step ([`ArtifactStore::ensure_exists`]) the
//! caller runs once at startup; constructing a store touches nothing.
//!
//! Every file name carries a local timestamp
//! (`<prefix>_YYYYMMDD_HHMMSS_mmm.<ext>`) and every write is atomic: the
//! content goes to a `.tmp` sibling which is then renamed into place, so
//! a crash never leaves a half-written artifact behind.

use crate::error::PersistError;
use crate::output::AnalysisReport;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A directory receiving timestamp-named artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory (and parents) if missing. Safe to call repeatedly.
    pub async fn ensure_exists(&self) -> Result<(), PersistError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PersistError::Io {
                path: self.root.clone(),
                source: e,
            })
    }

    /// Write the text extracted from one upload.
    pub async fn write_ocr_dump(&self, stem: &str, text: &str) -> Result<PathBuf, PersistError> {
        self.write_atomic(&format!("ocr_{stem}_{}", timestamp()), "txt", text.as_bytes())
            .await
    }

    /// Write the aggregate text of one run.
    pub async fn write_combined(&self, text: &str) -> Result<PathBuf, PersistError> {
        self.write_atomic(&format!("combined_text_{}", timestamp()), "txt", text.as_bytes())
            .await
    }

    /// Write `contents` to `<stem>.<ext>` (suffixed `_N` if taken).
    async fn write_atomic(&self, stem: &str, ext: &str, contents: &[u8]) -> Result<PathBuf, PersistError> {
        let path = self.unique_path(stem, ext).await;
        let io_err = |source: std::io::Error| PersistError::Io {
            path: path.clone(),
            source,
        };

        let tmp_path = path.with_extension(format!("{ext}.tmp"));
        tokio::fs::write(&tmp_path, contents).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_err(e));
        }

        debug!("Wrote {} ({} bytes)", path.display(), contents.len());
        Ok(path)
    }

    async fn unique_path(&self, stem: &str, ext: &str) -> PathBuf {
        let mut path = self.root.join(format!("{stem}.{ext}"));
        let mut n = 1;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = self.root.join(format!("{stem}_{n}.{ext}"));
            n += 1;
        }
        path
    }
}

/// Paths (or errors) of the two analysis artifacts. The writes are
/// independent, so either may succeed without the other.
#[derive(Debug)]
pub struct PersistOutcome {
    pub json: Result<PathBuf, PersistError>,
    pub text: Result<PathBuf, PersistError>,
}

impl PersistOutcome {
    pub fn is_complete(&self) -> bool {
        self.json.is_ok() && self.text.is_ok()
    }
}

/// Writes an [`AnalysisReport`] as `medical_analysis_<ts>.json` (full
/// report) and `medical_analysis_<ts>.txt` (analysis text only).
#[derive(Debug, Clone)]
pub struct ResultPersister {
    store: ArtifactStore,
}

impl ResultPersister {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub async fn persist(&self, report: &AnalysisReport) -> PersistOutcome {
        let stem = format!("medical_analysis_{}", timestamp());

        let json = match serde_json::to_vec_pretty(report) {
            Ok(bytes) => self.store.write_atomic(&stem, "json", &bytes).await,
            Err(source) => Err(PersistError::Json {
                path: self.store.root().join(format!("{stem}.json")),
                source,
            }),
        };
        if let Err(e) = &json {
            warn!("Failed to persist analysis JSON: {}", e);
        }

        let text = self
            .store
            .write_atomic(&stem, "txt", report.analysis.as_bytes())
            .await;
        if let Err(e) = &text {
            warn!("Failed to persist analysis text: {}", e);
        }

        PersistOutcome { json, text }
    }
}

/// Read a JSON analysis artifact back.
pub async fn read_report(path: impl AsRef<Path>) -> Result<AnalysisReport, PersistError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ProcessingMetadata;

    fn report(analysis: &str) -> AnalysisReport {
        AnalysisReport {
            timestamp: "2026-10-16T09:30:00+00:00".into(),
            source_reference: Some(PathBuf::from("combined_text_20261016_093000_000.txt")),
            analysis: analysis.into(),
            metadata: ProcessingMetadata {
                model: "test-model".into(),
                input_chars: 1234,
                duration_ms: 42,
            },
        }
    }

    #[tokio::test]
    async fn ensure_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("a/b/c"));
        store.ensure_exists().await.unwrap();
        store.ensure_exists().await.unwrap();
        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn new_store_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("later"));
        assert!(!store.root().exists());
    }

    #[tokio::test]
    async fn json_round_trip_preserves_analysis_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let persister = ResultPersister::new(store);

        let analysis = "## Findings\n\nHämoglobin: 13.5 g/dL ✓\r\n\t\"quoted\" \\ back\u{1F9EA}\n";
        let outcome = persister.persist(&report(analysis)).await;
        assert!(outcome.is_complete());

        let back = read_report(outcome.json.as_ref().unwrap()).await.unwrap();
        assert_eq!(back.analysis, analysis);
        assert_eq!(back, report(analysis));

        let txt = std::fs::read_to_string(outcome.text.as_ref().unwrap()).unwrap();
        assert_eq!(txt, analysis);
    }

    #[tokio::test]
    async fn persist_reports_both_failures_when_dir_missing() {
        let dir = tempfile::tempdir().unwrap();
        let persister = ResultPersister::new(ArtifactStore::new(dir.path().join("missing")));

        let outcome = persister.persist(&report("x")).await;
        assert!(outcome.json.is_err());
        assert!(outcome.text.is_err());
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn existing_entries_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        std::fs::create_dir(dir.path().join("taken.json")).unwrap();
        let path = store.write_atomic("taken", "json", b"{}").await.unwrap();
        assert!(path.ends_with("taken_1.json"));
        assert!(dir.path().join("taken.json").is_dir());
    }

    #[tokio::test]
    async fn names_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = store.write_atomic("same", "txt", b"1").await.unwrap();
        let b = store.write_atomic("same", "txt", b"2").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_to_string(a).unwrap(), "1");
        assert_eq!(std::fs::read_to_string(b).unwrap(), "2");
    }

    #[tokio::test]
    async fn no_tmp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.write_combined("combined").await.unwrap();
        store.write_ocr_dump("lab", "text").await.unwrap();
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn read_report_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(read_report(&path).await, Err(PersistError::Json { .. })));
    }
}
