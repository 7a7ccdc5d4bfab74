//! Conversion entry points and the per-run state machine.
//!
//! ```text
//! PENDING → DETECTING → ROUTING → EXTRACTING → RENDERING → EVALUATING → ACCEPTED
//!               │                                                   └─→ REJECTED
//!               └─ DocumentUnreadable ────────────────────────────────→ REJECTED
//! ```
//!
//! [`Converter::process`] never fails: every problem ends as a defect in the
//! [`RunReport`] and a rejected run. [`Converter::convert`] additionally
//! writes the artifacts, and only an output write failure is returned as an
//! error. A rejected run is terminal for that document but never for the
//! caller, who moves on to the next one.

use crate::config::ConversionConfig;
use crate::error::{DocRipError, Result};
use crate::model::{DocumentHints, ProcessingDefect, Severity};
use crate::output::{ConversionResult, RunReport};
use crate::pipeline::compliance;
use crate::pipeline::detect::detect;
use crate::pipeline::extract::{ExtractorRegistry, Orchestrator};
use crate::pipeline::input::{acquire, DocumentSource};
use crate::pipeline::markdown::render;
use crate::pipeline::postprocess::repair_structure;
use crate::pipeline::quality::{evaluate, QaContext};
use crate::pipeline::route::route;
use crate::pipeline::validate::{self, VisionValidator};
use crate::writer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Where a run is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Detecting,
    Routing,
    Extracting,
    Rendering,
    Evaluating,
    Accepted,
    Rejected,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Accepted | RunState::Rejected)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Pending => "PENDING",
            RunState::Detecting => "DETECTING",
            RunState::Routing => "ROUTING",
            RunState::Extracting => "EXTRACTING",
            RunState::Rendering => "RENDERING",
            RunState::Evaluating => "EVALUATING",
            RunState::Accepted => "ACCEPTED",
            RunState::Rejected => "REJECTED",
        })
    }
}

/// One document to convert.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub document: DocumentSource,
    /// Output name; defaults to the document's base name.
    pub document_name: Option<String>,
    pub hints: DocumentHints,
    /// Ground truth for CER / WER.
    pub reference_text: Option<String>,
}

impl ConversionRequest {
    pub fn new(document: DocumentSource) -> Self {
        Self {
            document,
            document_name: None,
            hints: DocumentHints::default(),
            reference_text: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.document_name = Some(name.into());
        self
    }

    pub fn hints(mut self, hints: DocumentHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn reference_text(mut self, text: impl Into<String>) -> Self {
        self.reference_text = Some(text.into());
        self
    }

    /// Name of the per-document output directory.
    pub fn output_name(&self) -> String {
        self.document_name
            .clone()
            .unwrap_or_else(|| self.document.base_name())
    }
}

/// Runs the pipeline. Holds configuration and extractors only, so one
/// converter can serve many concurrent runs.
#[derive(Debug, Clone)]
pub struct Converter {
    config: ConversionConfig,
    registry: ExtractorRegistry,
}

impl Converter {
    /// A converter with the built-in extractors.
    pub fn new(config: ConversionConfig) -> Self {
        let registry = ExtractorRegistry::with_defaults(&config);
        Self { config, registry }
    }

    /// A converter with caller-chosen extractors.
    pub fn with_registry(config: ConversionConfig, registry: ExtractorRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Run the pipeline without writing anything.
    pub async fn process(&self, request: &ConversionRequest) -> ConversionResult {
        self.run(request).await.0
    }

    /// Run the pipeline and write the artifacts under `output_root`.
    ///
    /// # Errors
    /// Only [`DocRipError::OutputWriteFailed`]; rejected runs are `Ok`.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
        output_root: impl AsRef<Path>,
    ) -> Result<ConversionResult> {
        let (mut result, started_at) = self.run(request).await;
        writer::write(
            &mut result,
            output_root.as_ref(),
            &request.output_name(),
            self.config.collision,
            started_at,
        )
        .await?;
        Ok(result)
    }

    async fn run(&self, request: &ConversionRequest) -> (ConversionResult, DateTime<Utc>) {
        let config = &self.config;
        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = tokio::time::Instant::now() + config.max_runtime;
        let run_id = new_run_id(started_at);
        let observer = config.observer.as_deref();
        let set_state = |state: RunState| {
            info!(run_id = %run_id, "→ {}", state);
            if let Some(o) = observer {
                o.on_state_change(&run_id, state);
            }
        };

        let mut report = RunReport::started(&run_id, &request.document.identifier(), config.mode);
        if let Some(o) = observer {
            o.on_run_start(&run_id, &request.output_name());
        }
        set_state(RunState::Pending);

        // ── Detect ───────────────────────────────────────────────────────
        set_state(RunState::Detecting);
        let detected = match acquire(&request.document).await {
            Ok(document) => {
                let document = Arc::new(document);
                detect(&document, &request.hints, config)
                    .await
                    .map(|outcome| (document, outcome))
            }
            Err(e) => Err(e),
        };
        let (document, detection) = match detected {
            Ok(v) => v,
            Err(e) => {
                warn!(run_id = %run_id, "Rejected before extraction: {}", e);
                report.defects.push(fatal_defect(&e));
                report.error_message = Some(e.to_string());
                report.processing_time_seconds = clock.elapsed().as_secs_f64();
                report.memory_peak_mb = memory_peak_mb();
                report.set_verdict(false);
                set_state(RunState::Rejected);
                if let Some(o) = observer {
                    o.on_run_complete(&run_id, false);
                }
                let result = ConversionResult {
                    markdown_content: String::new(),
                    provenance_records: Vec::new(),
                    run_report: report,
                    output_file_paths: None,
                };
                return (result, started_at);
            }
        };
        let characteristics = detection.characteristics;
        report.document_kind = Some(document.kind());

        // ── Route ────────────────────────────────────────────────────────
        set_state(RunState::Routing);
        let plan = route(&characteristics, &config.routing);
        info!(
            run_id = %run_id,
            "Route {:?}: {}",
            plan.rule,
            plan.extractors.iter().map(|e| e.as_str()).collect::<Vec<_>>().join(" → ")
        );

        // ── Extract ──────────────────────────────────────────────────────
        set_state(RunState::Extracting);
        let extraction = Orchestrator::new(&self.registry, deadline)
            .run_id(&run_id)
            .observer(observer)
            .extract(Arc::clone(&document), &plan)
            .await;

        let mut defects: Vec<ProcessingDefect> = detection.defects;
        defects.extend(extraction.defects.iter().cloned());

        // ── Render ───────────────────────────────────────────────────────
        set_state(RunState::Rendering);
        let rendered = render(&extraction, config.inline_provenance);
        let repaired = repair_structure(&rendered);
        defects.extend(repaired.defects);

        let memory_peak = memory_peak_mb();
        if let Some(peak) = memory_peak.filter(|p| *p > config.max_memory_mb as f64) {
            defects.push(ProcessingDefect::new(
                0,
                "document",
                format!(
                    "MemoryCeiling: peak {peak:.0} MiB exceeds {} MiB",
                    config.max_memory_mb
                ),
                Severity::Medium,
                "runtime",
            ));
        }

        // ── Evaluate ─────────────────────────────────────────────────────
        set_state(RunState::Evaluating);
        let mut tool_versions = extraction.tool_versions.clone();
        let mut vision = None;
        if config.vision_validation {
            let validator = VisionValidator::new(config);
            let checked =
                tokio::time::timeout_at(deadline, validator.check(&document, &repaired.markdown))
                    .await
                    .unwrap_or_else(|_| Err(validator.failure("run deadline reached")));
            match checked {
                Ok(Some(v)) => {
                    tool_versions.insert(validate::NAME.to_string(), validator.version().to_string());
                    defects.extend(v.defects(&validator.tool()));
                    for suggestion in &v.suggestions {
                        info!(run_id = %run_id, "Vision suggestion: {}", suggestion);
                    }
                    vision = Some(v);
                }
                Ok(None) => {}
                Err(defect) => {
                    warn!(run_id = %run_id, "{}", defect.description);
                    defects.push(defect);
                }
            }
        }
        drop(document);

        let qa = QaContext {
            mode: config.mode,
            thresholds: &config.quality,
            reference_text: request.reference_text.as_deref(),
            is_scanned: characteristics.is_scanned,
            vision: vision.as_ref(),
        };
        let verdict = evaluate(&extraction, &repaired.markdown, &defects, &qa);
        defects.extend(verdict.defects);

        let (markdown, provenance, redactions) = if config.compliance.is_active() {
            let applied =
                compliance::apply(&repaired.markdown, &extraction.provenance, &config.compliance);
            (applied.markdown, applied.provenance, applied.redactions.len())
        } else {
            (repaired.markdown, extraction.provenance.clone(), 0)
        };

        report.tool_versions = tool_versions;
        report.quality_metrics = verdict.metrics;
        report.defects = defects;
        report.processing_time_seconds = clock.elapsed().as_secs_f64();
        report.memory_peak_mb = memory_peak;
        report.characteristics = Some(characteristics);
        report.route = Some(plan);
        report.redactions = redactions;
        report.set_verdict(verdict.success);
        set_state(report.final_state);
        info!(
            run_id = %run_id,
            "Run {} in {:.2}s: {} block(s), {} defect(s)",
            report.final_state,
            report.processing_time_seconds,
            extraction.content_block_count(),
            report.defects.len()
        );
        if let Some(o) = observer {
            o.on_run_complete(&run_id, verdict.success);
        }

        let result = ConversionResult {
            markdown_content: markdown,
            provenance_records: provenance,
            run_report: report,
            output_file_paths: None,
        };
        (result, started_at)
    }
}

fn fatal_defect(error: &DocRipError) -> ProcessingDefect {
    ProcessingDefect::new(
        0,
        "document",
        format!("DocumentUnreadable: {error}"),
        Severity::Critical,
        "acquisition",
    )
}

/// `run_<8 hex>_<unix seconds>`.
fn new_run_id(started_at: DateTime<Utc>) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", &hex[..8], started_at.timestamp())
}

/// Peak resident set size of this process, from `VmHWM`.
#[cfg(target_os = "linux")]
fn memory_peak_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    let kib: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib / 1024.0)
}

#[cfg(not(target_os = "linux"))]
fn memory_peak_mb() -> Option<f64> {
    None
}

// ── Convenience functions ────────────────────────────────────────────────────

/// Convert one document with the built-in extractors and write it under
/// `output_root`.
///
/// # Example
/// ```rust,no_run
/// use docrip::{convert, ConversionConfig, ConversionRequest, DocumentSource};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let request = ConversionRequest::new(DocumentSource::path("report.docx"));
/// let result = convert(&request, "out", &ConversionConfig::default()).await?;
/// println!("accepted: {}", result.success());
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    request: &ConversionRequest,
    output_root: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult> {
    Converter::new(config.clone())
        .convert(request, output_root)
        .await
}

/// Run the pipeline on one document without writing anything.
pub async fn process(request: &ConversionRequest, config: &ConversionConfig) -> ConversionResult {
    Converter::new(config.clone()).process(request).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    request: &ConversionRequest,
    output_root: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocRipError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert(request, output_root, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_format() {
        let t = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let id = new_run_id(t);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(parts[2], "1700000000");
        assert_ne!(new_run_id(t), id);
    }

    #[test]
    fn run_state_serialises_upper_case() {
        assert_eq!(serde_json::to_string(&RunState::Extracting).unwrap(), "\"EXTRACTING\"");
        assert_eq!(RunState::Rejected.to_string(), "REJECTED");
        assert!(RunState::Accepted.is_terminal());
        assert!(!RunState::Evaluating.is_terminal());
    }

    #[test]
    fn output_name_defaults_to_base_name() {
        let r = ConversionRequest::new(DocumentSource::path("/in/My Doc.pdf"));
        assert_eq!(r.output_name(), "My Doc");
        assert_eq!(r.clone().name("other").output_name(), "other");
    }

    #[tokio::test]
    async fn zero_byte_input_is_rejected_with_report() {
        let request = ConversionRequest::new(DocumentSource::bytes(Vec::new(), "empty.pdf"));
        let result = process(&request, &ConversionConfig::default()).await;
        assert!(!result.success());
        assert!(result.markdown_content.is_empty());
        let report = &result.run_report;
        assert_eq!(report.final_state, RunState::Rejected);
        assert!(report.error_message.as_deref().unwrap().contains("unreadable"));
        assert_eq!(report.defects[0].severity, Severity::Critical);
        assert!(report.tool_versions.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn memory_peak_is_positive_on_linux() {
        assert!(memory_peak_mb().unwrap() > 0.0);
    }
}
