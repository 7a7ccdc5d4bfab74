//! Output types: what a run hands back to its caller.
//!
//! [`ConversionResult`] bundles the Markdown, the provenance records and
//! the [`RunReport`]. The report's `success` flag is derived by QA and is
//! the only signal a caller should route on; it is private to this crate
//! and read through [`RunReport::success`].

use crate::config::RunMode;
use crate::convert::RunState;
use crate::model::{DocumentCharacteristics, DocumentKind, ProcessingDefect, ProvenanceRecord};
use crate::pipeline::quality::QualityMetrics;
use crate::pipeline::route::RoutePlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    /// Final Markdown, after repair and compliance. Empty when nothing was
    /// recovered.
    pub markdown_content: String,

    /// One record per content block, in render order.
    pub provenance_records: Vec<ProvenanceRecord>,

    pub run_report: RunReport,

    /// Where the artifacts landed. `None` until the result is written.
    pub output_file_paths: Option<OutputPaths>,
}

impl ConversionResult {
    /// Shorthand for `run_report.success()`.
    pub fn success(&self) -> bool {
        self.run_report.success()
    }
}

/// The audit record of one run, serialised as `run_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub input_identifier: String,
    /// Extractor name → version, for every extractor that actually ran.
    pub tool_versions: BTreeMap<String, String>,
    pub quality_metrics: QualityMetrics,
    pub defects: Vec<ProcessingDefect>,
    pub processing_time_seconds: f64,
    /// Peak resident set size in MiB; `None` where the platform does not
    /// expose it.
    pub memory_peak_mb: Option<f64>,
    success: bool,
    /// ISO-8601, UTC.
    pub timestamp: String,

    pub document_kind: Option<DocumentKind>,
    pub run_mode: RunMode,
    pub characteristics: Option<DocumentCharacteristics>,
    pub route: Option<RoutePlan>,
    pub final_state: RunState,
    /// Why the run was rejected before QA, e.g. `DocumentUnreadable`.
    pub error_message: Option<String>,
    /// False when the Markdown was empty and no `.md` file was written.
    pub markdown_written: bool,
    pub redactions: usize,
}

impl RunReport {
    /// A report for a run that has just started. Rejected until QA says
    /// otherwise.
    pub(crate) fn started(run_id: &str, input_identifier: &str, run_mode: RunMode) -> Self {
        Self {
            run_id: run_id.to_string(),
            input_identifier: input_identifier.to_string(),
            tool_versions: BTreeMap::new(),
            quality_metrics: QualityMetrics::default(),
            defects: Vec::new(),
            processing_time_seconds: 0.0,
            memory_peak_mb: None,
            success: false,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            document_kind: None,
            run_mode,
            characteristics: None,
            route: None,
            final_state: RunState::Pending,
            error_message: None,
            markdown_written: false,
            redactions: 0,
        }
    }

    /// QA verdict. True only when content was recovered and no defect is
    /// `high` or `critical`.
    pub fn success(&self) -> bool {
        self.success
    }

    pub(crate) fn set_verdict(&mut self, success: bool) {
        self.success = success;
        self.final_state = if success {
            RunState::Accepted
        } else {
            RunState::Rejected
        };
    }

    /// Human-readable defect list, one per line.
    pub fn defect_summary(&self) -> String {
        self.defects
            .iter()
            .map(|d| {
                format!(
                    "[{}] page {} {}: {} ({})",
                    d.severity, d.page, d.element_type, d.description, d.tool_used
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Artifact locations for one document. All share `directory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPaths {
    pub directory: PathBuf,
    /// `None` when the Markdown was empty.
    pub markdown: Option<PathBuf>,
    pub provenance: PathBuf,
    pub run_report: PathBuf,
}

impl OutputPaths {
    /// Every written file.
    pub fn files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = Vec::with_capacity(3);
        if let Some(md) = &self.markdown {
            files.push(md);
        }
        files.push(&self.provenance);
        files.push(&self.run_report);
        files
    }
}
