//! Shared fixtures for the integration tests: DOCX builders and scripted
//! extractors that stand in for pdfium and the vision backend.

#![allow(dead_code)]

use docrip::{
    BoundingBox, ConversionConfig, DocumentHints, ElementContent, ElementError, ElementOutcome,
    ElementType, ExtractedElement, ExtractionContext, Extractor, ExtractorFuture, ExtractorId,
    ExtractorRegistry, PipelineObserver, RunState, SourceDocument,
};
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;

// ── DOCX fixtures ────────────────────────────────────────────────────────────

/// Wrap a `<w:body>` fragment in a minimal DOCX container.
pub fn docx(body: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = || SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    writer.start_file("[Content_Types].xml", opts()).unwrap();
    writer
        .write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
        .unwrap();
    writer.start_file("word/document.xml", opts()).unwrap();
    write!(
        writer,
        r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    )
    .unwrap();
    writer.finish().unwrap().into_inner()
}

pub fn para(text: &str) -> String {
    format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
}

pub fn heading(level: u8, text: &str) -> String {
    format!(r#"<w:p><w:pPr><w:pStyle w:val="Heading{level}"/></w:pPr><w:r><w:t>{text}</w:t></w:r></w:p>"#)
}

/// A uniform table; every cell is a single paragraph.
pub fn table(rows: &[&[&str]]) -> String {
    let mut xml = String::from("<w:tbl>");
    for row in rows {
        xml.push_str("<w:tr>");
        for cell in *row {
            xml.push_str(&format!("<w:tc>{}</w:tc>", para(cell)));
        }
        xml.push_str("</w:tr>");
    }
    xml.push_str("</w:tbl>");
    xml
}

pub fn three_paragraph_docx() -> Vec<u8> {
    docx(&format!(
        "{}{}{}",
        para("Alpha paragraph opens the report."),
        para("Bravo paragraph carries the middle."),
        para("Charlie paragraph closes it."),
    ))
}

/// Hints that fix every routing field, so no backend is sampled.
pub fn born_digital_hints() -> DocumentHints {
    DocumentHints::default()
        .scanned(false)
        .contains_tables(false)
        .contains_math(false)
        .has_images(false)
}

/// Bytes that sniff as a PDF. Only usable with complete hints and scripted
/// extractors.
pub fn fake_pdf() -> Vec<u8> {
    b"%PDF-1.7\n% test fixture\n".to_vec()
}

// ── Scripted extractors ──────────────────────────────────────────────────────

pub fn element(page: u32, top: f32, content: ElementContent) -> ExtractedElement {
    ExtractedElement::new(page, BoundingBox::new(72.0, top - 12.0, 540.0, top), 0.9, content)
}

/// Returns a fixed list of outcomes.
pub struct Scripted {
    pub name: &'static str,
    pub outcomes: Vec<ElementOutcome>,
}

impl Scripted {
    pub fn new(name: &'static str, outcomes: Vec<ElementOutcome>) -> Arc<Self> {
        Arc::new(Self { name, outcomes })
    }
}

impl Extractor for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> &str {
        "test-1"
    }

    fn extract<'a>(
        &'a self,
        _document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        let outcomes = self.outcomes.clone();
        Box::pin(async move { Ok(outcomes) })
    }
}

/// Fails as a whole before producing anything.
pub struct Crashing(pub &'static str);

impl Extractor for Crashing {
    fn name(&self) -> &str {
        self.0
    }

    fn version(&self) -> &str {
        "test-1"
    }

    fn extract<'a>(
        &'a self,
        _document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        let name = self.0;
        Box::pin(async move { Err(ElementError::backend(name, "backend crashed")) })
    }
}

/// Panics while the extraction future is being polled.
pub struct Panicking(pub &'static str);

impl Extractor for Panicking {
    fn name(&self) -> &str {
        self.0
    }

    fn version(&self) -> &str {
        "test-1"
    }

    fn extract<'a>(
        &'a self,
        _document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        Box::pin(async move {
            let rows: Vec<ElementOutcome> = Vec::new();
            if rows.is_empty() {
                panic!("backend bug");
            }
            Ok(rows)
        })
    }
}

/// Three paragraphs on page 1, top to bottom.
pub fn native_text() -> Arc<Scripted> {
    Scripted::new(
        "mock-text",
        vec![
            Ok(element(1, 700.0, ElementContent::Paragraph("First line of text.".into()))),
            Ok(element(1, 600.0, ElementContent::Paragraph("Second line of text.".into()))),
            Ok(element(1, 500.0, ElementContent::Paragraph("Third line of text.".into()))),
        ],
    )
}

/// Every element fails.
pub fn failing_text(n: u32) -> Arc<Scripted> {
    Scripted::new(
        "mock-text",
        (1..=n)
            .map(|page| {
                Err(ElementError::failed(
                    "mock-text",
                    page,
                    ElementType::Paragraph,
                    "glyph decoding failed",
                ))
            })
            .collect(),
    )
}

pub fn registry_with(entries: Vec<(ExtractorId, Arc<dyn Extractor>)>) -> ExtractorRegistry {
    let config = ConversionConfig::default();
    let mut registry = ExtractorRegistry::with_defaults(&config);
    for (id, extractor) in entries {
        registry.register(id, extractor);
    }
    registry
}

// ── Observer ─────────────────────────────────────────────────────────────────

/// Records every state transition.
#[derive(Default)]
pub struct StateLog {
    pub states: Mutex<Vec<RunState>>,
    pub extractors: Mutex<Vec<(String, usize, usize)>>,
}

impl PipelineObserver for StateLog {
    fn on_state_change(&self, _run_id: &str, state: RunState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_extractor_complete(&self, _run_id: &str, extractor: &str, recovered: usize, failed: usize) {
        self.extractors
            .lock()
            .unwrap()
            .push((extractor.to_string(), recovered, failed));
    }
}
