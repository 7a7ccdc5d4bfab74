//! Input acquisition: take a private copy of the caller's document.
//!
//! ## Why copy first?
//!
//! A folder watcher may move or delete the original while a run is still
//! reading it. Acquisition copies the bytes into a `TempDir` owned by the
//! returned [`SourceDocument`] before anything else looks at them; every later
//! stage reads the copy, and the copy is removed when the document is dropped.
//!
//! The document kind is sniffed from magic bytes first and the extension
//! second, so that a mislabelled file is still routed correctly and an empty
//! or structurally broken one fails with `DocumentUnreadable` before any
//! extractor runs.

use crate::error::DocRipError;
use crate::model::DocumentKind;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// PDF allows junk before the header within the first kilobyte.
const PDF_HEADER_WINDOW: usize = 1024;

/// Where the document comes from. Exactly one form is required.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    /// A file on disk. It is read once, then never touched again.
    Path(PathBuf),
    /// An in-memory buffer. `file_name` supplies the name and extension.
    Bytes { data: Vec<u8>, file_name: String },
}

impl DocumentSource {
    pub fn path(p: impl Into<PathBuf>) -> Self {
        DocumentSource::Path(p.into())
    }

    pub fn bytes(data: impl Into<Vec<u8>>, file_name: impl Into<String>) -> Self {
        DocumentSource::Bytes {
            data: data.into(),
            file_name: file_name.into(),
        }
    }

    /// Human-readable identifier recorded in the run report.
    pub fn identifier(&self) -> String {
        match self {
            DocumentSource::Path(p) => p.display().to_string(),
            DocumentSource::Bytes { file_name, .. } => file_name.clone(),
        }
    }

    /// File name including extension.
    pub fn file_name(&self) -> String {
        match self {
            DocumentSource::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string()),
            DocumentSource::Bytes { file_name, .. } => file_name.clone(),
        }
    }

    /// Base name without extension, e.g. `Annual Report-2024` for
    /// `Annual Report-2024.pdf`. Spaces, dashes and case are preserved.
    pub fn base_name(&self) -> String {
        let file_name = self.file_name();
        let stem = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        if stem.trim().is_empty() {
            "document".to_string()
        } else {
            stem
        }
    }
}

/// A privately owned copy of the input, alive for one run.
#[derive(Debug)]
pub struct SourceDocument {
    identifier: String,
    name: String,
    kind: DocumentKind,
    bytes: Vec<u8>,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl SourceDocument {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Base name without extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// The document contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Path of the private copy. Valid until the document is dropped.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Copy the input into a private temp directory and sniff its kind.
pub async fn acquire(source: &DocumentSource) -> Result<SourceDocument, DocRipError> {
    let identifier = source.identifier();
    let bytes = match source {
        DocumentSource::Path(path) => read_local(path).await?,
        DocumentSource::Bytes { data, .. } => data.clone(),
    };

    if bytes.is_empty() {
        return Err(DocRipError::unreadable(&identifier, "file is empty (0 bytes)"));
    }

    let file_name = sanitize_file_name(&source.file_name());
    let kind = sniff_kind(&bytes, &file_name).map_err(|reason| DocRipError::unreadable(&identifier, reason))?;

    let temp_dir = TempDir::new().map_err(|e| DocRipError::Internal(format!("temp dir: {e}")))?;
    let path = temp_dir.path().join(&file_name);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| DocRipError::Internal(format!("Failed to write private copy: {e}")))?;

    info!(
        "Acquired '{}' ({} bytes, kind={}) into {}",
        identifier,
        bytes.len(),
        kind,
        path.display()
    );

    Ok(SourceDocument {
        identifier,
        name: source.base_name(),
        kind,
        bytes,
        path,
        _temp_dir: temp_dir,
    })
}

async fn read_local(path: &Path) -> Result<Vec<u8>, DocRipError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            debug!("Read local input: {}", path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DocRipError::FileNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DocRipError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) => Err(DocRipError::unreadable(
            path.display().to_string(),
            format!("read failed: {e}"),
        )),
    }
}

/// Determine the document kind, or explain why the bytes are unusable.
pub fn sniff_kind(bytes: &[u8], file_name: &str) -> Result<DocumentKind, String> {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let head = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        return Ok(DocumentKind::Pdf);
    }
    if bytes.starts_with(OLE_MAGIC) {
        return Ok(DocumentKind::LegacyDoc);
    }
    if bytes.starts_with(ZIP_MAGIC) {
        let archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| format!("corrupt ZIP container: {e}"))?;
        let has_body = archive.file_names().any(|n| n == "word/document.xml");
        return match (has_body, ext.as_str()) {
            (true, _) => Ok(DocumentKind::Docx),
            (false, "docx") => Err("ZIP container has no word/document.xml".into()),
            (false, _) => Ok(DocumentKind::Unknown),
        };
    }

    match ext.as_str() {
        "pdf" => Err("missing %PDF header; file is corrupt or not a PDF".into()),
        "docx" => Err("not a ZIP container; file is corrupt or not a .docx".into()),
        "doc" => Err("missing OLE signature; file is corrupt or not a .doc".into()),
        _ => Ok(DocumentKind::Unknown),
    }
}

/// Strip path separators and characters that are invalid on common filesystems.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}
