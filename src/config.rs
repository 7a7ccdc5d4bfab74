//! Configuration types for document conversion.
//!
//! Every knob lives in one [`ConversionConfig`], built via its
//! [`ConversionConfigBuilder`] and handed to [`crate::Converter`] at
//! construction time. Nothing in the library reads environment variables;
//! the CLI maps flags and env vars onto this struct at the boundary.

use crate::error::DocRipError;
use crate::progress::Observer;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for [`ConversionConfigBuilder::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for a conversion run.
///
/// # Example
/// ```rust
/// use docrip::{ConversionConfig, RunMode};
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .mode(RunMode::Evaluation)
///     .max_runtime(Duration::from_secs(600))
///     .math_signal_threshold(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.routing.math_signal_threshold, 8);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Thresholds the router compares characteristics against.
    pub routing: RoutingThresholds,

    /// Pages sampled by the PDF probe. Default: 3.
    ///
    /// Detection must finish in bounded time whatever the document size, so
    /// only the leading pages are inspected.
    pub sample_pages: usize,

    /// Paragraphs sampled by the Word probe. Default: 50.
    pub sample_paragraphs: usize,

    /// Average non-whitespace characters per sampled page below which a PDF
    /// counts as scanned. Default: 50.
    pub scanned_chars_per_page: usize,

    /// Production runs the basic gate; evaluation also checks metric thresholds.
    pub mode: RunMode,

    /// Deadline for one run, from acquisition to the end of extraction. Default: 3600 s.
    ///
    /// When it expires, in-flight extractors are abandoned and whatever was
    /// already extracted is still rendered and evaluated.
    pub max_runtime: Duration,

    /// Memory ceiling in MiB. Default: 8192.
    ///
    /// Exceeding it does not abort the run; it records a medium defect.
    pub max_memory_mb: u64,

    /// Metric thresholds checked in [`RunMode::Evaluation`].
    pub quality: QualityThresholds,

    /// PII redaction and classification stamping.
    pub compliance: CompliancePolicy,

    /// Embed `<!-- provenance ... -->` markers next to each block. Default: true.
    pub inline_provenance: bool,

    /// What to do when `output_root/<name>/` already exists. Default: suffix.
    pub collision: CollisionPolicy,

    /// Directory holding the pdfium shared library. `None` binds the system copy.
    pub pdfium_library_dir: Option<PathBuf>,

    /// Vision LLM used by the OCR extractor. Scanned documents fail without one.
    pub vision_provider: Option<Arc<dyn LLMProvider>>,

    /// Model label recorded in tool versions, e.g. "gpt-4.1-nano".
    pub vision_model: Option<String>,

    /// Rendering DPI for OCR page images. Range: 72–400. Default: 150.
    pub ocr_dpi: u32,

    /// Cap on the rendered page width/height in pixels. Default: 2000.
    pub ocr_max_pixels: u32,

    /// Sampling temperature for OCR calls. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per OCR page. Default: 4096.
    pub max_tokens: usize,

    /// Retries on a transient OCR failure. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request OCR timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Ask the vision provider to compare the rendered Markdown with page
    /// images before the verdict. PDFs only. Default: false.
    pub vision_validation: bool,

    /// Leading pages shown to the vision cross-check. Default: 1.
    pub validation_pages: u32,

    /// Receives stage and extractor events. Default: none.
    pub observer: Option<Observer>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            routing: RoutingThresholds::default(),
            sample_pages: 3,
            sample_paragraphs: 50,
            scanned_chars_per_page: 50,
            mode: RunMode::default(),
            max_runtime: Duration::from_secs(3600),
            max_memory_mb: 8192,
            quality: QualityThresholds::default(),
            compliance: CompliancePolicy::default(),
            inline_provenance: true,
            collision: CollisionPolicy::default(),
            pdfium_library_dir: None,
            vision_provider: None,
            vision_model: None,
            ocr_dpi: 150,
            ocr_max_pixels: 2000,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            vision_validation: false,
            validation_pages: 1,
            observer: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("routing", &self.routing)
            .field("sample_pages", &self.sample_pages)
            .field("sample_paragraphs", &self.sample_paragraphs)
            .field("mode", &self.mode)
            .field("max_runtime", &self.max_runtime)
            .field("max_memory_mb", &self.max_memory_mb)
            .field("compliance", &self.compliance)
            .field("inline_provenance", &self.inline_provenance)
            .field("collision", &self.collision)
            .field("pdfium_library_dir", &self.pdfium_library_dir)
            .field(
                "vision_provider",
                &self.vision_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .field("vision_model", &self.vision_model)
            .field("ocr_dpi", &self.ocr_dpi)
            .field("vision_validation", &self.vision_validation)
            .finish_non_exhaustive()
    }
}

impl ConversionConfig {
    /// Create a builder with default values.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: ConversionConfig::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn routing(mut self, routing: RoutingThresholds) -> Self {
        self.config.routing = routing;
        self
    }

    pub fn math_signal_threshold(mut self, n: u32) -> Self {
        self.config.routing.math_signal_threshold = n;
        self
    }

    pub fn table_density_threshold(mut self, d: f32) -> Self {
        self.config.routing.table_density_threshold = d.clamp(0.0, 1.0);
        self
    }

    pub fn sample_pages(mut self, n: usize) -> Self {
        self.config.sample_pages = n;
        self
    }

    pub fn sample_paragraphs(mut self, n: usize) -> Self {
        self.config.sample_paragraphs = n;
        self
    }

    pub fn scanned_chars_per_page(mut self, n: usize) -> Self {
        self.config.scanned_chars_per_page = n;
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_runtime(mut self, d: Duration) -> Self {
        self.config.max_runtime = d;
        self
    }

    pub fn max_memory_mb(mut self, mb: u64) -> Self {
        self.config.max_memory_mb = mb;
        self
    }

    pub fn quality(mut self, q: QualityThresholds) -> Self {
        self.config.quality = q;
        self
    }

    pub fn compliance(mut self, policy: CompliancePolicy) -> Self {
        self.config.compliance = policy;
        self
    }

    pub fn classification(mut self, c: Classification) -> Self {
        self.config.compliance.classification = c;
        self
    }

    pub fn pii_redaction(mut self, v: bool) -> Self {
        self.config.compliance.pii_redaction = v;
        self
    }

    pub fn inline_provenance(mut self, v: bool) -> Self {
        self.config.inline_provenance = v;
        self
    }

    pub fn collision(mut self, policy: CollisionPolicy) -> Self {
        self.config.collision = policy;
        self
    }

    pub fn pdfium_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_dir = Some(dir.into());
        self
    }

    pub fn vision_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.vision_provider = Some(provider);
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi;
        self
    }

    pub fn ocr_max_pixels(mut self, px: u32) -> Self {
        self.config.ocr_max_pixels = px;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn vision_validation(mut self, v: bool) -> Self {
        self.config.vision_validation = v;
        self
    }

    pub fn validation_pages(mut self, n: u32) -> Self {
        self.config.validation_pages = n.max(1);
        self
    }

    pub fn observer(mut self, observer: Observer) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, DocRipError> {
        let c = &self.config;
        if c.ocr_dpi < 72 || c.ocr_dpi > 400 {
            return Err(DocRipError::InvalidConfig(format!(
                "OCR DPI must be 72–400, got {}",
                c.ocr_dpi
            )));
        }
        if c.sample_pages == 0 || c.sample_paragraphs == 0 {
            return Err(DocRipError::InvalidConfig(
                "Detection sample sizes must be ≥ 1".into(),
            ));
        }
        if c.vision_validation && c.vision_provider.is_none() {
            return Err(DocRipError::InvalidConfig(
                "vision validation needs a vision provider".into(),
            ));
        }
        if c.max_runtime.is_zero() {
            return Err(DocRipError::InvalidConfig(
                "max_runtime must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Policy types ─────────────────────────────────────────────────────────

/// Router thresholds. Both comparisons are strict (`>`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingThresholds {
    /// Math route when `math_signal_strength` exceeds this. Default: 5.
    pub math_signal_threshold: u32,
    /// Table route when `table_density` exceeds this. Default: 0.5.
    pub table_density_threshold: f32,
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self {
            math_signal_threshold: 5,
            table_density_threshold: 0.5,
        }
    }
}

/// Which quality gate a run goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Success rule only. (default)
    #[default]
    Production,
    /// Success rule plus metric thresholds, each miss recorded as a medium defect.
    Evaluation,
}

/// Targets for [`RunMode::Evaluation`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    pub cer_born_digital: f64,
    pub cer_scanned: f64,
    pub structure_accuracy: f64,
    pub table_structure: f64,
    pub math_token_match: f64,
    pub provenance_coverage: f64,
    /// Floor for the vision cross-check's completeness score.
    pub content_completeness: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            cer_born_digital: 0.005,
            cer_scanned: 0.015,
            structure_accuracy: 0.95,
            table_structure: 0.90,
            math_token_match: 0.90,
            provenance_coverage: 0.99,
            content_completeness: 0.95,
        }
    }
}

/// Document classification marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    /// No banner. (default)
    #[default]
    Unclassified,
    Internal,
    Confidential,
    Restricted,
}

impl Classification {
    pub fn tag(self) -> &'static str {
        match self {
            Classification::Unclassified => "UNCLASSIFIED",
            Classification::Internal => "INTERNAL",
            Classification::Confidential => "CONFIDENTIAL",
            Classification::Restricted => "RESTRICTED",
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = DocRipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNCLASSIFIED" => Ok(Classification::Unclassified),
            "INTERNAL" => Ok(Classification::Internal),
            "CONFIDENTIAL" => Ok(Classification::Confidential),
            "RESTRICTED" => Ok(Classification::Restricted),
            other => Err(DocRipError::InvalidConfig(format!(
                "unknown classification '{other}'"
            ))),
        }
    }
}

/// Compliance stage settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompliancePolicy {
    pub classification: Classification,
    pub pii_redaction: bool,
}

impl CompliancePolicy {
    /// True when the stage would change anything.
    pub fn is_active(&self) -> bool {
        self.pii_redaction || self.classification != Classification::Unclassified
    }
}

/// Resolution of an already-existing per-document output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollisionPolicy {
    /// Append `_<run timestamp>` to the document name. (default)
    #[default]
    Suffix,
    /// Reuse the directory, replacing the three artifacts.
    Overwrite,
}
