//! Intermediate data model shared by every pipeline stage.
//!
//! Extractors emit [`ExtractedElement`]s; the orchestrator folds them into an
//! [`ExtractionResult`], appending the block and its [`ProvenanceRecord`] in
//! one step so coverage is correct by construction.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ElementError;

/// Characters kept in [`ProvenanceRecord::content_preview`].
pub const PREVIEW_CHARS: usize = 50;

/// Hex characters kept from the SHA-256 digest in a content hash.
const HASH_HEX_CHARS: usize = 16;

// ── Enumerations ─────────────────────────────────────────────────────────────

/// Kind of content an element carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Paragraph,
    Table,
    Image,
    Equation,
    Heading,
    List,
}

impl ElementType {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Paragraph => "paragraph",
            ElementType::Table => "table",
            ElementType::Image => "image",
            ElementType::Equation => "equation",
            ElementType::Heading => "heading",
            ElementType::List => "list",
        }
    }

    /// Paragraphs, headings and list items carry the document's text; every
    /// other element is secondary content.
    pub fn is_primary(self) -> bool {
        matches!(
            self,
            ElementType::Paragraph | ElementType::Heading | ElementType::List
        )
    }

    /// Severity given to a failure to extract an element of this type.
    pub fn failure_severity(self) -> Severity {
        match self {
            ElementType::Paragraph | ElementType::Heading | ElementType::List => Severity::High,
            ElementType::Table | ElementType::Equation => Severity::Medium,
            ElementType::Image => Severity::Low,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defect severity. `High` and `Critical` block acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn blocks_acceptance(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

/// Document family, sniffed from magic bytes and then the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    /// Office Open XML word-processing document (`.docx`).
    Docx,
    /// Legacy binary Word document (`.doc`).
    LegacyDoc,
    Unknown,
}

impl DocumentKind {
    pub fn is_word_family(self) -> bool {
        matches!(self, DocumentKind::Docx | DocumentKind::LegacyDoc)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::LegacyDoc => "doc",
            DocumentKind::Unknown => "unknown",
        })
    }
}

// ── Geometry ─────────────────────────────────────────────────────────────────

/// Axis-aligned box in PDF user space (points, origin bottom-left).
///
/// Zeroed when the concept does not apply (Word paragraphs).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub const ZERO: BoundingBox = BoundingBox {
        x0: 0.0,
        y0: 0.0,
        x1: 0.0,
        y1: 0.0,
    };

    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        if *self == BoundingBox::ZERO {
            return *other;
        }
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).abs()
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        BoundingBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.1}, {:.1}, {:.1}, {:.1}]",
            self.x0, self.y0, self.x1, self.y1
        )
    }
}

// ── Characteristics ──────────────────────────────────────────────────────────

/// What the detector learned about a document. Drives routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCharacteristics {
    pub kind: DocumentKind,
    pub is_scanned: bool,
    pub has_text_layer: bool,
    /// Share of sampled pages carrying tabular structure, in `[0, 1]`.
    pub table_density: f32,
    pub math_signal_strength: u32,
    pub languages: Vec<String>,
    pub estimated_domain: Option<String>,
    pub has_tables: bool,
    pub has_images: bool,
}

impl DocumentCharacteristics {
    /// Born-digital defaults used when nothing could be sampled.
    pub fn born_digital(kind: DocumentKind) -> Self {
        Self {
            kind,
            is_scanned: false,
            has_text_layer: true,
            table_density: 0.0,
            math_signal_strength: 0,
            languages: Vec::new(),
            estimated_domain: None,
            has_tables: false,
            has_images: false,
        }
    }

    /// Apply caller hints field by field. Hints always win.
    pub fn with_hints(mut self, hints: &DocumentHints) -> Self {
        if let Some(v) = hints.is_scanned {
            self.is_scanned = v;
        }
        if let Some(v) = hints.has_text_layer {
            self.has_text_layer = v;
        }
        if let Some(v) = hints.table_density {
            self.table_density = v.clamp(0.0, 1.0);
        }
        if let Some(v) = hints.math_signal_strength {
            self.math_signal_strength = v;
        }
        if let Some(v) = &hints.languages {
            self.languages = v.clone();
        }
        if let Some(v) = &hints.estimated_domain {
            self.estimated_domain = Some(v.clone());
        }
        if let Some(v) = hints.has_tables {
            self.has_tables = v;
        }
        if let Some(v) = hints.has_images {
            self.has_images = v;
        }
        self
    }
}

/// Caller-supplied partial characteristics. Every `Some` field overrides the
/// detected value unconditionally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentHints {
    pub is_scanned: Option<bool>,
    pub has_text_layer: Option<bool>,
    pub table_density: Option<f32>,
    pub math_signal_strength: Option<u32>,
    pub languages: Option<Vec<String>>,
    pub estimated_domain: Option<String>,
    pub has_tables: Option<bool>,
    pub has_images: Option<bool>,
}

impl DocumentHints {
    pub fn scanned(mut self, v: bool) -> Self {
        self.is_scanned = Some(v);
        self.has_text_layer.get_or_insert(!v);
        self
    }

    /// Coarse table hint: density 1.0 or 0.0.
    pub fn contains_tables(mut self, v: bool) -> Self {
        self.table_density = Some(if v { 1.0 } else { 0.0 });
        self.has_tables = Some(v);
        self
    }

    /// Coarse math hint: signal strength 10 or 0.
    pub fn contains_math(mut self, v: bool) -> Self {
        self.math_signal_strength = Some(if v { 10 } else { 0 });
        self
    }

    pub fn has_images(mut self, v: bool) -> Self {
        self.has_images = Some(v);
        self
    }

    pub fn languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = Some(langs.into_iter().map(Into::into).collect());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.estimated_domain = Some(domain.into());
        self
    }

    /// True when the hints fix every field the router and renderer read,
    /// so sampling the document can be skipped.
    pub fn is_complete(&self) -> bool {
        self.is_scanned.is_some()
            && self.has_text_layer.is_some()
            && self.table_density.is_some()
            && self.math_signal_strength.is_some()
            && self.has_tables.is_some()
            && self.has_images.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == DocumentHints::default()
    }
}

// ── Provenance & defects ─────────────────────────────────────────────────────

/// Where one content block came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub page: u32,
    pub bounding_box: BoundingBox,
    pub tool: String,
    pub confidence: f32,
    pub content_hash: String,
    pub element_type: ElementType,
    pub content_preview: String,
}

impl ProvenanceRecord {
    pub fn new(
        content: &str,
        page: u32,
        bbox: BoundingBox,
        tool: &str,
        confidence: f32,
        element_type: ElementType,
    ) -> Self {
        Self {
            page,
            bounding_box: bbox,
            tool: tool.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            content_hash: content_hash(content, &bbox, page),
            element_type,
            content_preview: preview(content),
        }
    }
}

/// Stable hash of element text, box and page.
pub fn content_hash(content: &str, bbox: &BoundingBox, page: u32) -> String {
    let digest = Sha256::digest(format!("{content}:{bbox}:{page}").as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_HEX_CHARS);
    hex
}

fn preview(content: &str) -> String {
    let collapsed: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(PREVIEW_CHARS).collect()
}

/// A problem noticed by any stage. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingDefect {
    pub page: u32,
    /// Element type name, or the stage scope (`document`, `markdown`, ...).
    pub element_type: String,
    pub description: String,
    pub severity: Severity,
    pub tool_used: String,
}

impl ProcessingDefect {
    pub fn new(
        page: u32,
        element_type: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        tool_used: impl Into<String>,
    ) -> Self {
        Self {
            page,
            element_type: element_type.into(),
            description: description.into(),
            severity,
            tool_used: tool_used.into(),
        }
    }
}

// ── Extracted elements ───────────────────────────────────────────────────────

/// One cell of a table. Spans are `1` for ordinary cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub text: String,
    pub row_span: u32,
    pub col_span: u32,
}

impl TableCell {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            row_span: 1,
            col_span: 1,
        }
    }

    pub fn spanning(text: impl Into<String>, row_span: u32, col_span: u32) -> Self {
        Self {
            text: text.into(),
            row_span: row_span.max(1),
            col_span: col_span.max(1),
        }
    }

    pub fn is_merged(&self) -> bool {
        self.row_span > 1 || self.col_span > 1
    }
}

/// Payload of an [`ExtractedElement`].
#[derive(Debug, Clone, PartialEq)]
pub enum ElementContent {
    Paragraph(String),
    Heading { level: u8, text: String },
    ListItem(String),
    Table(Vec<Vec<TableCell>>),
    Image { target: String, alt: Option<String> },
    Equation(String),
}

impl ElementContent {
    pub fn element_type(&self) -> ElementType {
        match self {
            ElementContent::Paragraph(_) => ElementType::Paragraph,
            ElementContent::Heading { .. } => ElementType::Heading,
            ElementContent::ListItem(_) => ElementType::List,
            ElementContent::Table(_) => ElementType::Table,
            ElementContent::Image { .. } => ElementType::Image,
            ElementContent::Equation(_) => ElementType::Equation,
        }
    }

    /// Text used for hashing and previews.
    pub fn text(&self) -> String {
        match self {
            ElementContent::Paragraph(t)
            | ElementContent::ListItem(t)
            | ElementContent::Equation(t)
            | ElementContent::Heading { text: t, .. } => t.clone(),
            ElementContent::Table(rows) => rows
                .iter()
                .map(|r| {
                    r.iter()
                        .map(|c| c.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .collect::<Vec<_>>()
                .join("\n"),
            ElementContent::Image { target, alt } => match alt {
                Some(a) => format!("{a} ({target})"),
                None => target.clone(),
            },
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            ElementContent::Table(rows) => rows.iter().all(|r| r.is_empty()),
            ElementContent::Image { target, .. } => target.trim().is_empty(),
            other => other.text().trim().is_empty(),
        }
    }
}

/// What an extractor hands back for one element.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedElement {
    pub page: u32,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub content: ElementContent,
}

impl ExtractedElement {
    pub fn new(page: u32, bbox: BoundingBox, confidence: f32, content: ElementContent) -> Self {
        Self {
            page,
            bbox,
            confidence,
            content,
        }
    }
}

// ── Blocks held by the result ────────────────────────────────────────────────

/// Paragraph, heading or list item. `level` is 0 unless a heading.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub element_type: ElementType,
    pub level: u8,
    pub text: String,
    pub page: u32,
    /// Index into [`ExtractionResult::provenance`].
    pub provenance: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableBlock {
    pub rows: Vec<Vec<TableCell>>,
    pub page: u32,
    pub provenance: usize,
}

impl TableBlock {
    /// Rectangular, non-empty, and free of merged cells.
    pub fn is_uniform(&self) -> bool {
        let Some(first) = self.rows.first() else {
            return false;
        };
        let width = first.len();
        width > 0
            && self
                .rows
                .iter()
                .all(|r| r.len() == width && r.iter().all(|c| !c.is_merged()))
    }

    pub fn has_merged_cells(&self) -> bool {
        self.rows.iter().flatten().any(TableCell::is_merged)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub target: String,
    pub alt: Option<String>,
    pub page: u32,
    pub provenance: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquationBlock {
    pub latex: String,
    pub page: u32,
    pub provenance: usize,
}

/// An element that failed and will render as a TODO placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct UnrecoveredElement {
    pub page: u32,
    pub bbox: BoundingBox,
    pub element_type: ElementType,
    pub tool: String,
}

// ── Accumulator ──────────────────────────────────────────────────────────────

/// Everything extracted from one document during one run.
///
/// Owned by the orchestrator while it is being built; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub text_blocks: Vec<TextBlock>,
    pub tables: Vec<TableBlock>,
    pub images: Vec<ImageRef>,
    pub math_equations: Vec<EquationBlock>,
    pub provenance: Vec<ProvenanceRecord>,
    pub defects: Vec<ProcessingDefect>,
    pub unrecovered: Vec<UnrecoveredElement>,
    /// Tool name → version for every extractor that ran.
    pub tool_versions: BTreeMap<String, String>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one element and its provenance record.
    ///
    /// Returns `false` when the element was blank. Repeated content is kept:
    /// two elements with equal text are two blocks with two records.
    pub fn push_element(&mut self, element: ExtractedElement, tool: &str) -> bool {
        if element.content.is_blank() {
            return false;
        }
        let text = element.content.text();
        let record = ProvenanceRecord::new(
            &text,
            element.page,
            element.bbox,
            tool,
            element.confidence,
            element.content.element_type(),
        );

        let provenance = self.provenance.len();
        let page = element.page;
        self.provenance.push(record);
        match element.content {
            ElementContent::Paragraph(text) => self.text_blocks.push(TextBlock {
                element_type: ElementType::Paragraph,
                level: 0,
                text,
                page,
                provenance,
            }),
            ElementContent::Heading { level, text } => self.text_blocks.push(TextBlock {
                element_type: ElementType::Heading,
                level: level.clamp(1, 6),
                text,
                page,
                provenance,
            }),
            ElementContent::ListItem(text) => self.text_blocks.push(TextBlock {
                element_type: ElementType::List,
                level: 0,
                text,
                page,
                provenance,
            }),
            ElementContent::Table(rows) => self.tables.push(TableBlock {
                rows,
                page,
                provenance,
            }),
            ElementContent::Image { target, alt } => self.images.push(ImageRef {
                target,
                alt,
                page,
                provenance,
            }),
            ElementContent::Equation(latex) => self.math_equations.push(EquationBlock {
                latex,
                page,
                provenance,
            }),
        }
        true
    }

    pub fn record_defect(&mut self, defect: ProcessingDefect) {
        self.defects.push(defect);
    }

    /// Convert an extractor failure into a defect.
    ///
    /// Element-level failures also leave a placeholder for the renderer.
    /// `fallback` is the severity used when the error names no element.
    pub fn record_failure(&mut self, error: &ElementError, tool: &str, fallback: Severity) {
        let (element_type, severity) = match error.element_type() {
            Some(t) => {
                self.unrecovered.push(UnrecoveredElement {
                    page: error.page(),
                    bbox: BoundingBox::ZERO,
                    element_type: t,
                    tool: tool.to_string(),
                });
                (t.as_str().to_string(), t.failure_severity())
            }
            None => ("document".to_string(), fallback),
        };
        self.defects.push(ProcessingDefect::new(
            error.page(),
            element_type,
            format!("ExtractorFailure: {error}"),
            severity,
            tool,
        ));
    }

    /// All text blocks joined with blank lines.
    pub fn text_content(&self) -> String {
        self.text_blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn content_block_count(&self) -> usize {
        self.text_blocks.len() + self.tables.len() + self.images.len() + self.math_equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content_block_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn para(page: u32, text: &str) -> ExtractedElement {
        ExtractedElement::new(
            page,
            BoundingBox::ZERO,
            1.0,
            ElementContent::Paragraph(text.into()),
        )
    }

    #[test]
    fn push_appends_block_and_provenance_together() {
        let mut r = ExtractionResult::new();
        assert!(r.push_element(para(0, "First."), "docx-text@0.1"));
        assert!(r.push_element(para(0, "Second."), "docx-text@0.1"));
        assert_eq!(r.text_blocks.len(), 2);
        assert_eq!(r.provenance.len(), 2);
        assert_eq!(r.text_blocks[1].provenance, 1);
        assert_eq!(r.provenance[1].content_preview, "Second.");
        assert_eq!(r.text_content(), "First.\n\nSecond.");
    }

    #[test]
    fn repeats_are_kept_and_blanks_dropped() {
        let mut r = ExtractionResult::new();
        assert!(r.push_element(para(0, "Signed:"), "docx-text@0.1"));
        assert!(r.push_element(para(0, "Alice"), "docx-text@0.1"));
        assert!(r.push_element(para(0, "Signed:"), "docx-text@0.1"));
        assert!(!r.push_element(para(0, "   "), "docx-text@0.1"));
        assert_eq!(r.text_blocks.len(), 3);
        assert_eq!(r.provenance.len(), 3);
        assert_eq!(r.provenance[0].content_hash, r.provenance[2].content_hash);
        assert_eq!(r.text_blocks[2].provenance, 2);
    }

    #[test]
    fn content_hash_is_stable_and_short() {
        let b = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        let h1 = content_hash("abc", &b, 1);
        let h2 = content_hash("abc", &b, 1);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert_ne!(h1, content_hash("abc", &b, 2));
    }

    #[test]
    fn preview_is_truncated_to_fifty_chars() {
        let long = "x".repeat(200);
        let rec = ProvenanceRecord::new(&long, 0, BoundingBox::ZERO, "t", 1.0, ElementType::Paragraph);
        assert_eq!(rec.content_preview.chars().count(), PREVIEW_CHARS);
    }

    #[test]
    fn element_failure_leaves_placeholder_and_severity_by_type() {
        let mut r = ExtractionResult::new();
        let e = ElementError::failed("t", 2, ElementType::Table, "boom");
        r.record_failure(&e, "t@1", Severity::High);
        assert_eq!(r.defects[0].severity, Severity::Medium);
        assert_eq!(r.unrecovered.len(), 1);

        let whole = ElementError::Unsupported {
            extractor: "t".into(),
            reason: "nope".into(),
        };
        r.record_failure(&whole, "t@1", Severity::High);
        assert_eq!(r.defects[1].severity, Severity::High);
        assert_eq!(r.defects[1].element_type, "document");
        assert_eq!(r.unrecovered.len(), 1);
    }

    #[test]
    fn hints_override_field_by_field() {
        let detected = DocumentCharacteristics {
            table_density: 0.1,
            math_signal_strength: 2,
            ..DocumentCharacteristics::born_digital(DocumentKind::Pdf)
        };
        let hints = DocumentHints::default().contains_math(true);
        let merged = detected.with_hints(&hints);
        assert_eq!(merged.math_signal_strength, 10);
        assert_eq!(merged.table_density, 0.1);
    }

    #[test]
    fn uniform_table_detection() {
        let t = TableBlock {
            rows: vec![
                vec![TableCell::new("a"), TableCell::new("b")],
                vec![TableCell::new("1"), TableCell::new("2")],
            ],
            page: 0,
            provenance: 0,
        };
        assert!(t.is_uniform());
        let mut ragged = t.clone();
        ragged.rows[1].pop();
        assert!(!ragged.is_uniform());
        let mut merged = t;
        merged.rows[0][0].col_span = 2;
        assert!(!merged.is_uniform());
        assert!(merged.has_merged_cells());
    }

    #[test]
    fn bbox_serializes_as_array() {
        let json = serde_json::to_string(&BoundingBox::new(0.0, 1.5, 2.0, 3.0)).unwrap();
        assert_eq!(json, "[0.0,1.5,2.0,3.0]");
    }
}
