//! Word-native extractors over the DOCX body.
//!
//! Word has no fixed pages, so every element is reported on page 0 with a
//! zeroed bounding box. Each extractor re-parses the body and keeps its own
//! block kind; parsing is cheap next to any PDF backend.

use crate::error::ElementError;
use crate::model::{BoundingBox, DocumentKind, ElementContent, ElementType, ExtractedElement};
use crate::pipeline::docx::{self, DocxBlock, DocxContent, ParagraphStyle};
use crate::pipeline::extract::{ElementOutcome, ExtractionContext, Extractor, ExtractorFuture};
use crate::pipeline::input::SourceDocument;
use std::sync::Arc;

const CONFIDENCE: f32 = 1.0;
const VERSION: &str = env!("CARGO_PKG_VERSION");
const LEGACY_UNSUPPORTED: &str = "legacy .doc binary format not supported";

async fn parse(tool: &str, document: &Arc<SourceDocument>) -> Result<DocxContent, ElementError> {
    let doc = Arc::clone(document);
    tokio::task::spawn_blocking(move || docx::parse(doc.bytes(), None))
        .await
        .map_err(|e| ElementError::backend(tool, format!("parse task panicked: {e}")))?
        .map_err(|e| ElementError::backend(tool, e.to_string()))
}

fn element(content: ElementContent) -> ElementOutcome {
    Ok(ExtractedElement::new(0, BoundingBox::ZERO, CONFIDENCE, content))
}

fn unsupported(tool: &str, kind: DocumentKind) -> ElementError {
    ElementError::Unsupported {
        extractor: tool.to_string(),
        reason: format!("expected a .docx, got {kind}"),
    }
}

/// Paragraphs, headings and list items.
pub struct WordTextExtractor;

impl WordTextExtractor {
    const NAME: &'static str = "docx-text";
}

impl Extractor for WordTextExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn extract<'a>(
        &'a self,
        document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        Box::pin(async move {
            match document.kind() {
                DocumentKind::Docx => {}
                DocumentKind::LegacyDoc => {
                    return Ok(vec![Err(ElementError::failed(
                        Self::NAME,
                        0,
                        ElementType::Paragraph,
                        LEGACY_UNSUPPORTED,
                    ))]);
                }
                other => return Err(unsupported(Self::NAME, other)),
            }

            let content = parse(Self::NAME, &document).await?;
            Ok(content
                .blocks
                .into_iter()
                .filter_map(|block| match block {
                    DocxBlock::Paragraph { style, text } => Some(element(match style {
                        ParagraphStyle::Body => ElementContent::Paragraph(text),
                        ParagraphStyle::Heading(level) => ElementContent::Heading { level, text },
                        ParagraphStyle::ListItem => ElementContent::ListItem(text),
                    })),
                    _ => None,
                })
                .collect())
        })
    }
}

/// Tables, spans preserved.
pub struct WordTableExtractor;

impl WordTableExtractor {
    const NAME: &'static str = "docx-table";
}

impl Extractor for WordTableExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn extract<'a>(
        &'a self,
        document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        Box::pin(async move {
            if document.kind() != DocumentKind::Docx {
                return Err(unsupported(Self::NAME, document.kind()));
            }
            let content = parse(Self::NAME, &document).await?;
            Ok(content
                .blocks
                .into_iter()
                .filter_map(|block| match block {
                    DocxBlock::Table(rows) => Some(element(ElementContent::Table(rows))),
                    _ => None,
                })
                .collect())
        })
    }
}

/// Embedded images, as archive paths.
pub struct WordImageExtractor;

impl WordImageExtractor {
    const NAME: &'static str = "docx-image";
}

impl Extractor for WordImageExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn extract<'a>(
        &'a self,
        document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        Box::pin(async move {
            if document.kind() != DocumentKind::Docx {
                return Err(unsupported(Self::NAME, document.kind()));
            }
            let content = parse(Self::NAME, &document).await?;
            Ok(content
                .blocks
                .into_iter()
                .filter_map(|block| match block {
                    DocxBlock::Image { target, alt } => {
                        Some(element(ElementContent::Image { target, alt }))
                    }
                    _ => None,
                })
                .collect())
        })
    }
}
