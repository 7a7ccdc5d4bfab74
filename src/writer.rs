//! Output writer: one directory per document, three artifacts inside it.
//!
//! ```text
//! <output_root>/<name>/
//!     <name>.md            (omitted when the Markdown is empty)
//!     provenance.jsonl
//!     run_report.json
//! ```
//!
//! Nothing is ever written next to the directory. When the directory
//! already exists, [`CollisionPolicy::Suffix`] picks a fresh
//! `<name>_<YYYYMMDD_HHMMSS>` directory before anything is written; the
//! Markdown file keeps the document's own name. Each file is written to a
//! temporary sibling and renamed into place, so readers never see a
//! partial artifact.

use crate::config::CollisionPolicy;
use crate::error::{DocRipError, Result};
use crate::output::{ConversionResult, OutputPaths};
use crate::pipeline::input::sanitize_file_name;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PROVENANCE_FILE: &str = "provenance.jsonl";
pub const RUN_REPORT_FILE: &str = "run_report.json";

/// Pick the per-document directory under `output_root`.
///
/// `stamp` is the run's start time, used for the collision suffix.
pub fn resolve_directory(
    output_root: &Path,
    document_name: &str,
    policy: CollisionPolicy,
    stamp: DateTime<Utc>,
) -> PathBuf {
    let name = sanitize_file_name(document_name);
    let plain = output_root.join(&name);
    if policy == CollisionPolicy::Overwrite || !plain.exists() {
        return plain;
    }

    let base = format!("{}_{}", name, stamp.format("%Y%m%d_%H%M%S"));
    let mut candidate = output_root.join(&base);
    let mut n = 2;
    while candidate.exists() {
        candidate = output_root.join(format!("{base}_{n}"));
        n += 1;
    }
    debug!("'{}' exists; writing to {}", plain.display(), candidate.display());
    candidate
}

/// Write the three artifacts for `result` and record their paths on it.
pub async fn write(
    result: &mut ConversionResult,
    output_root: &Path,
    document_name: &str,
    policy: CollisionPolicy,
    stamp: DateTime<Utc>,
) -> Result<OutputPaths> {
    let directory = resolve_directory(output_root, document_name, policy, stamp);
    tokio::fs::create_dir_all(&directory)
        .await
        .map_err(|e| write_failed(&directory, e))?;

    let md_path = directory.join(format!("{}.md", sanitize_file_name(document_name)));
    let markdown = if result.markdown_content.is_empty() {
        // A stale file from an overwritten run would contradict the report.
        if tokio::fs::try_exists(&md_path).await.unwrap_or(false) {
            tokio::fs::remove_file(&md_path)
                .await
                .map_err(|e| write_failed(&md_path, e))?;
        }
        None
    } else {
        write_atomic(&md_path, result.markdown_content.as_bytes()).await?;
        Some(md_path)
    };
    result.run_report.markdown_written = markdown.is_some();

    let provenance_path = directory.join(PROVENANCE_FILE);
    let mut jsonl = String::new();
    for record in &result.provenance_records {
        let line = serde_json::to_string(record)
            .map_err(|e| write_failed(&provenance_path, e.into()))?;
        jsonl.push_str(&line);
        jsonl.push('\n');
    }
    write_atomic(&provenance_path, jsonl.as_bytes()).await?;

    let report_path = directory.join(RUN_REPORT_FILE);
    let paths = OutputPaths {
        directory,
        markdown,
        provenance: provenance_path,
        run_report: report_path.clone(),
    };
    result.output_file_paths = Some(paths.clone());
    let report = serde_json::to_string_pretty(&result.run_report)
        .map_err(|e| write_failed(&report_path, e.into()))?;
    write_atomic(&report_path, report.as_bytes()).await?;

    info!(
        run_id = %result.run_report.run_id,
        "Wrote {} artifact(s) to {}",
        paths.files().len(),
        paths.directory.display()
    );
    Ok(paths)
}

/// Temp file + rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| write_failed(path, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| write_failed(path, e))
}

fn write_failed(path: &Path, source: std::io::Error) -> DocRipError {
    DocRipError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}
