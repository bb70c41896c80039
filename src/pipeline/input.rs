//! Upload boundary: the files a caller hands to the pipeline.
//!
//! The pipeline never touches the caller's file system. Whatever front-end
//! collects the uploads (the CLI here, a web form elsewhere) turns each one
//! into an [`UploadedFile`] holding the bytes, the declared name and the
//! declared MIME type; the pipeline consumes them once and drops them.

use crate::output::DocumentKind;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// One uploaded document. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedFile {
    name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, declaring the MIME type guessed from its
    /// extension (`application/octet-stream` when unknown).
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!("Read upload '{}' ({}, {} bytes)", name, mime, bytes.len());
        Ok(Self::new(name, mime.essence_str(), bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> DocumentKind {
        DocumentKind::from_mime(&self.mime_type)
    }

    /// File name without extension, safe to embed in an artifact name.
    pub fn artifact_stem(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let safe: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if safe.is_empty() {
            "upload".to_string()
        } else {
            safe
        }
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}
