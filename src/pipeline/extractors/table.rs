//! Column-aligned text runs → tables.
//!
//! A table is two or more consecutive lines that split into the same number
//! (at least two) of columns on wide horizontal gaps. The first line is the
//! header. pdfium exposes no cell structure, so spans are never detected
//! here and every cell is 1×1.

use super::load_layouts;
use crate::error::ElementError;
use crate::model::{BoundingBox, ElementContent, ElementType, ExtractedElement, TableCell};
use crate::pipeline::extract::{ExtractionContext, Extractor, ExtractorFuture};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::pdf::{PageLayout, PdfBackendError, TextLine, PDFIUM_RENDER_VERSION};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

const NAME: &str = "pdfium-table";
const CONFIDENCE: f32 = 0.75;

const MIN_ROWS: usize = 2;
const MIN_COLUMNS: usize = 2;

pub struct TableExtractor {
    library_dir: Option<PathBuf>,
}

impl TableExtractor {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }
}

impl Extractor for TableExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        PDFIUM_RENDER_VERSION
    }

    fn extract<'a>(
        &'a self,
        document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        Box::pin(async move {
            let layouts = load_layouts(NAME, &document, self.library_dir.clone()).await?;
            Ok(layouts
                .into_iter()
                .flat_map(|layout| match layout {
                    Ok(layout) => page_tables(&layout).into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(PdfBackendError::Page { page, detail }) => {
                        vec![Err(ElementError::failed(NAME, page, ElementType::Table, detail))]
                    }
                    Err(e) => vec![Err(ElementError::backend(NAME, e.to_string()))],
                })
                .collect())
        })
    }
}

/// Line ranges that form tables.
pub fn tabular_runs(lines: &[TextLine]) -> Vec<Range<usize>> {
    let widths: Vec<usize> = lines.iter().map(|l| l.columns().len()).collect();
    let mut runs = Vec::new();
    let mut start = 0;
    while start < widths.len() {
        let width = widths[start];
        let mut end = start + 1;
        while end < widths.len() && widths[end] == width {
            end += 1;
        }
        if width >= MIN_COLUMNS && end - start >= MIN_ROWS {
            runs.push(start..end);
        }
        start = end;
    }
    runs
}

/// Tables found on one page.
pub fn page_tables(layout: &PageLayout) -> Vec<ExtractedElement> {
    tabular_runs(&layout.lines)
        .into_iter()
        .map(|run| {
            let lines = &layout.lines[run];
            let bbox = lines
                .iter()
                .fold(BoundingBox::ZERO, |acc, l| acc.union(&l.bbox));
            let rows = lines
                .iter()
                .map(|l| l.columns().into_iter().map(TableCell::new).collect())
                .collect();
            ExtractedElement::new(layout.page, bbox, CONFIDENCE, ElementContent::Table(rows))
        })
        .collect()
}
