//! # docrip
//!
//! Convert PDF and Word documents to Markdown with a provenance trail and an
//! audit report for every run.
//!
//! ## Why this crate?
//!
//! A single extraction tool rarely handles every document well: text-layer
//! PDFs, scanned pages, dense tables and formulae each want a different
//! approach. This crate samples the document first, routes it to an ordered
//! set of extractors, merges their output in reading order and then lets a
//! quality gate decide whether the result is good enough to ship. Nothing is
//! silently dropped: every failure becomes a defect in the run report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / DOCX
//!  │
//!  ├─ 1. Acquire   private copy in a temp dir, kind sniffed from magic bytes
//!  ├─ 2. Detect    sample pages / paragraphs; caller hints override
//!  ├─ 3. Route     characteristics → ordered extractor plan
//!  ├─ 4. Extract   fault-isolated extractors, merged in reading order
//!  ├─ 5. Render    deterministic Markdown + inline provenance markers
//!  ├─ 6. Evaluate  metrics, defects, accept / reject
//!  ├─ 7. Comply    PII redaction and classification banner
//!  └─ 8. Write     <name>.md + provenance.jsonl + run_report.json
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docrip::{convert, ConversionConfig, ConversionRequest, DocumentSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let request = ConversionRequest::new(DocumentSource::path("report.pdf"));
//!     let result = convert(&request, "out", &config).await?;
//!     println!("accepted: {}", result.success());
//!     for defect in &result.run_report.defects {
//!         eprintln!("{}: {}", defect.severity, defect.description);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docrip` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docrip = { version = "0.1", default-features = false }
//! ```
//!
//! ## Extractors
//!
//! Scanned PDFs are read by a vision model through `edgequake-llm`; set
//! [`ConversionConfig::vision_provider`] or let the CLI pick a provider from
//! the environment. Every other extractor is local. Any extractor can be
//! replaced through [`ExtractorRegistry`].
//!
//! With [`ConversionConfig::vision_validation`] set, the same provider is
//! shown the leading PDF pages next to the Markdown; the issues it reports
//! land in the run report as defects.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod folder;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod writer;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Classification, CollisionPolicy, CompliancePolicy, ConversionConfig, ConversionConfigBuilder,
    QualityThresholds, RoutingThresholds, RunMode,
};
pub use convert::{convert, convert_sync, process, ConversionRequest, Converter, RunState};
pub use error::{DocRipError, ElementError, Result};
pub use folder::{BatchError, BatchStats, FolderProcessor};
pub use model::{
    BoundingBox, DocumentCharacteristics, DocumentHints, DocumentKind, ElementContent,
    ElementType, ExtractedElement, ExtractionResult, ProcessingDefect, ProvenanceRecord, Severity,
    TableCell,
};
pub use output::{ConversionResult, OutputPaths, RunReport};
pub use pipeline::extract::{
    ElementOutcome, ExtractionContext, Extractor, ExtractorFuture, ExtractorRegistry,
};
pub use pipeline::input::{DocumentSource, SourceDocument};
pub use pipeline::quality::QualityMetrics;
pub use pipeline::route::{ExtractorId, RoutePlan};
pub use pipeline::validate::{VisionValidator, VisionVerdict};
pub use progress::{NoopObserver, Observer, PipelineObserver};
