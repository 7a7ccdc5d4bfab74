//! Vision cross-check: the provider compares page images with the Markdown.
//!
//! Runs between rendering and the verdict when
//! [`ConversionConfig::vision_validation`] is on. The leading pages are
//! rasterised, sent with the marker-free Markdown, and the model answers with
//! one JSON object. Its scores fold into [`QualityMetrics`] and every issue
//! it reports becomes a defect, so a `high` issue rejects the run.
//!
//! A cross-check that cannot complete (render failure, provider failure,
//! unparseable answer) records one `medium` defect and leaves the verdict to
//! the local checks. Word documents are not rasterised and are skipped.

use crate::config::ConversionConfig;
use crate::model::{DocumentKind, ProcessingDefect, Severity};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::markdown::strip_markers;
use crate::pipeline::pdf;
use crate::pipeline::quality::QualityMetrics;
use crate::pipeline::vision::{chat_with_retries, encode_page};
use crate::prompts::{validation_instruction, VALIDATION_SYSTEM_PROMPT};
use edgequake_llm::{ChatMessage, ImageData, LLMProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NAME: &str = "vision-validate";

/// The model's answer. Missing fields stay `None` / empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionVerdict {
    pub confidence_score: Option<f64>,
    pub content_completeness: Option<f64>,
    pub formatting_accuracy: Option<f64>,
    pub table_accuracy: Option<f64>,
    pub image_caption_accuracy: Option<f64>,
    #[serde(alias = "defects")]
    pub issues: Vec<ReportedIssue>,
    pub suggestions: Vec<String>,
}

/// One problem the model saw on a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportedIssue {
    pub page: u32,
    pub element_type: String,
    pub description: String,
    pub severity: String,
}

impl VisionVerdict {
    /// Scores clamped to `[0, 1]`; NaN and infinities dropped.
    fn normalised(mut self) -> Self {
        for score in [
            &mut self.confidence_score,
            &mut self.content_completeness,
            &mut self.formatting_accuracy,
            &mut self.table_accuracy,
            &mut self.image_caption_accuracy,
        ] {
            *score = score.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 1.0));
        }
        self.issues.retain(|i| !i.description.trim().is_empty());
        self
    }

    /// Reported issues as defects attributed to `tool`.
    pub fn defects(&self, tool: &str) -> Vec<ProcessingDefect> {
        self.issues
            .iter()
            .map(|issue| {
                let element_type = match issue.element_type.trim() {
                    "" => "document",
                    t => t,
                };
                ProcessingDefect::new(
                    issue.page,
                    element_type,
                    format!("VisionValidation: {}", issue.description.trim()),
                    reported_severity(&issue.severity),
                    tool,
                )
            })
            .collect()
    }

    /// Merge the scores into locally computed metrics.
    ///
    /// Table and structure scores are only raised, and only where the local
    /// check produced one; the vision-only scores are set as reported.
    pub fn fold_into(&self, metrics: &mut QualityMetrics) {
        raise(&mut metrics.table_structure_score, self.table_accuracy);
        raise(&mut metrics.structure_accuracy, self.formatting_accuracy);
        metrics.vision_confidence = self.confidence_score;
        metrics.content_completeness = self.content_completeness;
        metrics.image_caption_accuracy = self.image_caption_accuracy;
    }
}

fn raise(local: &mut Option<f64>, vision: Option<f64>) {
    if let (Some(l), Some(v)) = (local.as_mut(), vision) {
        *l = l.max(v);
    }
}

/// Unknown labels count as medium. "critical" is capped at high.
fn reported_severity(label: &str) -> Severity {
    match label.trim().to_ascii_lowercase().as_str() {
        "low" => Severity::Low,
        "high" | "critical" => Severity::High,
        _ => Severity::Medium,
    }
}

/// Pull the JSON object out of the model's answer.
///
/// Models wrap JSON in prose or fences often enough that the outermost
/// `{ ... }` span is taken.
pub fn parse_verdict(answer: &str) -> Result<VisionVerdict, String> {
    let (Some(start), Some(end)) = (answer.find('{'), answer.rfind('}')) else {
        return Err("no JSON object in the answer".to_string());
    };
    if end < start {
        return Err("no JSON object in the answer".to_string());
    }
    serde_json::from_str::<VisionVerdict>(&answer[start..=end])
        .map(VisionVerdict::normalised)
        .map_err(|e| format!("unparseable verdict: {e}"))
}

/// Send the images and Markdown, then parse the answer.
pub async fn ask(
    provider: &Arc<dyn LLMProvider>,
    images: Vec<ImageData>,
    markdown: &str,
    config: &ConversionConfig,
) -> Result<VisionVerdict, String> {
    let messages = vec![
        ChatMessage::system(VALIDATION_SYSTEM_PROMPT),
        ChatMessage::user_with_images(validation_instruction(markdown, images.len()), images),
    ];
    let answer = chat_with_retries(provider, "Validation", &messages, config).await?;
    parse_verdict(&answer)
}

/// Runs the cross-check for one document.
pub struct VisionValidator<'a> {
    config: &'a ConversionConfig,
    version: String,
}

impl<'a> VisionValidator<'a> {
    pub fn new(config: &'a ConversionConfig) -> Self {
        let version = match &config.vision_model {
            Some(model) => format!("{}+{}", env!("CARGO_PKG_VERSION"), model),
            None => env!("CARGO_PKG_VERSION").to_string(),
        };
        Self { config, version }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `name@version`, as recorded on defects.
    pub fn tool(&self) -> String {
        format!("{NAME}@{}", self.version)
    }

    /// The defect recorded when the cross-check could not complete.
    pub fn failure(&self, reason: impl std::fmt::Display) -> ProcessingDefect {
        ProcessingDefect::new(
            0,
            "document",
            format!("VisionValidation: cross-check failed: {reason}"),
            Severity::Medium,
            self.tool(),
        )
    }

    /// `Ok(None)` when the document is not a PDF or the Markdown is empty.
    pub async fn check(
        &self,
        document: &SourceDocument,
        markdown: &str,
    ) -> Result<Option<VisionVerdict>, ProcessingDefect> {
        let Some(provider) = self.config.vision_provider.clone() else {
            return Err(self.failure("no vision provider configured"));
        };
        if document.kind() != DocumentKind::Pdf {
            debug!("Vision cross-check skipped for {}", document.kind());
            return Ok(None);
        }
        let markdown = strip_markers(markdown);
        if markdown.trim().is_empty() {
            return Ok(None);
        }

        let path = document.path().to_path_buf();
        let dir = self.config.pdfium_library_dir.clone();
        let dpi = self.config.ocr_dpi;
        let max_pixels = self.config.ocr_max_pixels;
        let limit = self.config.validation_pages.max(1) as usize;
        let pages = tokio::task::spawn_blocking(move || {
            pdf::render_pages(&path, dir.as_deref(), dpi, max_pixels, Some(limit))
        })
        .await
        .map_err(|e| self.failure(format!("render task panicked: {e}")))?
        .map_err(|e| self.failure(e))?;

        let mut images = Vec::with_capacity(pages.len());
        for (page_num, rendered) in pages {
            match rendered.map_err(|e| e.to_string()).and_then(|img| {
                encode_page(&img).map_err(|e| format!("PNG encoding failed: {e}"))
            }) {
                Ok(data) => images.push(data),
                Err(e) => warn!("Vision cross-check: page {} unusable: {}", page_num, e),
            }
        }
        if images.is_empty() {
            return Err(self.failure("no page could be rendered"));
        }

        let shown = images.len();
        let verdict = ask(&provider, images, &markdown, self.config)
            .await
            .map_err(|e| self.failure(e))?;
        info!(
            "Vision cross-check over {} page(s): {} issue(s), completeness {:?}",
            shown,
            verdict.issues.len(),
            verdict.content_completeness
        );
        Ok(Some(verdict))
    }
}
