//! Batch collaborator: convert every supported file in a folder.
//!
//! Each document is an independent unit of failure. After the core returns,
//! the original is moved to `processed/success/` or `processed/failed/`
//! depending only on `run_report.success`, renamed
//! `<stem>_<YYYYMMDD_HHMMSS><ext>` so repeated drops never clash. The core
//! has already taken its own copy, so moving the original cannot race a
//! running extraction.

use crate::convert::{ConversionRequest, Converter};
use crate::error::{DocRipError, Result};
use crate::model::DocumentHints;
use crate::pipeline::input::DocumentSource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Extensions picked up from the input folder (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "docx", "doc"];

/// Counters for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<BatchError>,
}

/// Why one document of a batch failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    pub file: PathBuf,
    pub error: String,
}

/// Converts a folder of documents, one at a time.
pub struct FolderProcessor {
    converter: Converter,
    input_dir: PathBuf,
    processed_dir: PathBuf,
    output_dir: PathBuf,
    hints: DocumentHints,
}

impl FolderProcessor {
    pub fn new(
        converter: Converter,
        input_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            converter,
            input_dir: input_dir.into(),
            processed_dir: processed_dir.into(),
            output_dir: output_dir.into(),
            hints: DocumentHints::default(),
        }
    }

    /// Hints applied to every document of the batch.
    pub fn with_hints(mut self, hints: DocumentHints) -> Self {
        self.hints = hints;
        self
    }

    /// Supported files in the input folder, sorted by name.
    pub fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.input_dir)? {
            let path = entry?.path();
            if path.is_file() && is_supported(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Convert everything currently in the input folder.
    pub async fn process_all(&self) -> Result<BatchStats> {
        let files = self.pending_files()?;
        if files.is_empty() {
            info!("No supported documents in {}", self.input_dir.display());
        } else {
            info!("Found {} document(s) to process", files.len());
        }

        let mut stats = BatchStats::default();
        for file in files {
            stats.processed += 1;
            match self.process_file(&file).await {
                Ok(true) => stats.succeeded += 1,
                Ok(false) => {
                    stats.failed += 1;
                }
                Err(e) => {
                    error!("Error processing {}: {}", file.display(), e);
                    stats.failed += 1;
                    stats.errors.push(BatchError {
                        file: file.clone(),
                        error: e.to_string(),
                    });
                    if let Err(move_err) = self.move_to_processed(&file, false).await {
                        warn!("Could not move {}: {}", file.display(), move_err);
                    }
                }
            }
        }
        info!(
            "Batch done: {} processed, {} succeeded, {} failed",
            stats.processed, stats.succeeded, stats.failed
        );
        Ok(stats)
    }

    /// Convert one file, write its artifacts and move the original.
    ///
    /// Returns the QA verdict. `Err` means the artifacts could not be
    /// written; the original is then left where it was.
    pub async fn process_file(&self, path: &Path) -> Result<bool> {
        info!("Processing document: {}", path.display());
        let request =
            ConversionRequest::new(DocumentSource::path(path)).hints(self.hints.clone());
        let result = self.converter.convert(&request, &self.output_dir).await?;
        let success = result.success();

        if !success {
            let report = &result.run_report;
            let reason = report
                .error_message
                .clone()
                .unwrap_or_else(|| report.defect_summary());
            warn!("Rejected {}: {}", path.display(), reason);
        }
        self.move_to_processed(path, success).await?;
        Ok(success)
    }

    /// Move the original into `processed/success` or `processed/failed`.
    pub async fn move_to_processed(&self, path: &Path, success: bool) -> Result<PathBuf> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DocRipError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let folder = self
            .processed_dir
            .join(if success { "success" } else { "failed" });
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| DocRipError::OutputWriteFailed {
                path: folder.clone(),
                source: e,
            })?;

        let target = folder.join(processed_name(path, chrono::Local::now().naive_local()));
        move_file(path, &target).await?;
        info!("Moved {} to {}", path.display(), target.display());
        Ok(target)
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

/// `<stem>_<YYYYMMDD_HHMMSS><ext>`.
fn processed_name(path: &Path, at: chrono::NaiveDateTime) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{}_{}{}", stem, at.format("%Y%m%d_%H%M%S"), ext)
}

/// Rename, or copy and delete when the target is on another filesystem.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| DocRipError::OutputWriteFailed {
            path: to.to_path_buf(),
            source: e,
        })?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
