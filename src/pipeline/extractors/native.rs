//! Native text layer → paragraphs, headings and list items.
//!
//! Lines come from [`crate::pipeline::pdf::group_lines`]. A new paragraph
//! starts when the vertical gap to the previous line exceeds
//! [`PARAGRAPH_GAP`] times its height, or when a line opens with a bullet.
//! Single-line paragraphs set noticeably larger than the page's median line
//! height are promoted to headings.
//!
//! When the table or math extractor runs in the same plan, lines they claim
//! are skipped here so the same text is not emitted twice.
//!
//! Documents of unknown type that decode as UTF-8 are read as plain text.

use super::load_layouts;
use super::math::is_equation_line;
use super::table::tabular_runs;
use crate::error::ElementError;
use crate::model::{BoundingBox, DocumentKind, ElementContent, ElementType, ExtractedElement};
use crate::pipeline::extract::{ElementOutcome, ExtractionContext, Extractor, ExtractorFuture};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::pdf::{PageLayout, PdfBackendError, TextLine, PDFIUM_RENDER_VERSION};
use crate::pipeline::route::ExtractorId;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

const NAME: &str = "pdfium-text";
const CONFIDENCE: f32 = 0.95;
/// Plain-text fallback is exact, but has no geometry.
const PLAIN_TEXT_CONFIDENCE: f32 = 0.9;

/// Vertical gap, in line heights, that separates paragraphs.
const PARAGRAPH_GAP: f32 = 0.8;

const BULLETS: [char; 6] = ['•', '◦', '▪', '-', '*', '–'];

pub struct NativeTextExtractor {
    library_dir: Option<PathBuf>,
}

impl NativeTextExtractor {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }
}

impl Extractor for NativeTextExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        PDFIUM_RENDER_VERSION
    }

    fn extract<'a>(
        &'a self,
        document: Arc<SourceDocument>,
        context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        Box::pin(async move {
            if document.kind() == DocumentKind::Unknown {
                return plain_text(&document);
            }

            let layouts = load_layouts(NAME, &document, self.library_dir.clone()).await?;
            let skip_tables = context.includes(ExtractorId::Table);
            let skip_math = context.includes(ExtractorId::Math);

            let mut outcomes = Vec::new();
            for layout in layouts {
                match layout {
                    Ok(layout) => {
                        let claimed = claimed_lines(&layout.lines, skip_tables, skip_math);
                        outcomes.extend(page_elements(&layout, &claimed).into_iter().map(Ok));
                    }
                    Err(e) => {
                        let page = match &e {
                            PdfBackendError::Page { page, .. } => *page,
                            _ => 0,
                        };
                        outcomes.push(Err(ElementError::failed(
                            NAME,
                            page,
                            ElementType::Paragraph,
                            e.to_string(),
                        )));
                    }
                }
            }
            Ok(outcomes)
        })
    }
}

/// Indices of lines another extractor in the plan will emit.
fn claimed_lines(lines: &[TextLine], tables: bool, math: bool) -> HashSet<usize> {
    let mut claimed = HashSet::new();
    if tables {
        for run in tabular_runs(lines) {
            claimed.extend(run);
        }
    }
    if math {
        claimed.extend(
            lines
                .iter()
                .enumerate()
                .filter(|(_, l)| is_equation_line(&l.plain()))
                .map(|(i, _)| i),
        );
    }
    claimed
}

struct Paragraph {
    lines: Vec<String>,
    bbox: BoundingBox,
    bullet: bool,
    height: f32,
}

/// Group one page's unclaimed lines into elements.
pub fn page_elements(layout: &PageLayout, claimed: &HashSet<usize>) -> Vec<ExtractedElement> {
    let median = median_height(&layout.lines);
    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut prev: Option<&TextLine> = None;

    for (idx, line) in layout.lines.iter().enumerate() {
        if claimed.contains(&idx) {
            prev = None;
            continue;
        }
        let text = line.plain();
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let bullet = strip_bullet(text).is_some();
        let new_paragraph = match prev {
            None => true,
            Some(p) => {
                let gap = p.bbox.y0 - line.bbox.y1;
                bullet || gap > PARAGRAPH_GAP * p.bbox.height().max(1.0)
            }
        };

        let current = if new_paragraph { None } else { paragraphs.last_mut() };
        if let Some(current) = current {
            current.lines.push(text.to_string());
            current.bbox = current.bbox.union(&line.bbox);
        } else {
            paragraphs.push(Paragraph {
                lines: vec![text.to_string()],
                bbox: line.bbox,
                bullet,
                height: line.bbox.height(),
            });
        }
        prev = Some(line);
    }

    paragraphs
        .into_iter()
        .map(|p| {
            let text = join_lines(&p.lines);
            let content = if p.bullet {
                ElementContent::ListItem(strip_bullet(&text).unwrap_or(&text).to_string())
            } else if let Some(level) = heading_level(&p, median) {
                ElementContent::Heading { level, text }
            } else {
                ElementContent::Paragraph(text)
            };
            ExtractedElement::new(layout.page, p.bbox, CONFIDENCE, content)
        })
        .collect()
}

fn heading_level(p: &Paragraph, median: f32) -> Option<u8> {
    if p.lines.len() != 1 || median <= 0.0 || p.lines[0].chars().count() > 120 {
        return None;
    }
    let ratio = p.height / median;
    if ratio >= 1.6 {
        Some(1)
    } else if ratio >= 1.25 {
        Some(2)
    } else {
        None
    }
}

fn median_height(lines: &[TextLine]) -> f32 {
    let mut heights: Vec<f32> = lines.iter().map(|l| l.bbox.height()).collect();
    if heights.is_empty() {
        return 0.0;
    }
    heights.sort_by(f32::total_cmp);
    heights[heights.len() / 2]
}

/// Text after a leading bullet and space, if the line has one.
fn strip_bullet(text: &str) -> Option<&str> {
    let mut chars = text.chars();
    let first = chars.next()?;
    if !BULLETS.contains(&first) {
        return None;
    }
    let rest = chars.as_str();
    rest.starts_with(' ').then(|| rest.trim_start())
}

/// Join wrapped lines, undoing end-of-line hyphenation.
pub fn join_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        if out.is_empty() {
            out.push_str(line);
            continue;
        }
        let hyphenated = out.ends_with('-')
            && out
                .chars()
                .rev()
                .nth(1)
                .is_some_and(char::is_alphabetic)
            && line.chars().next().is_some_and(char::is_lowercase);
        if hyphenated {
            out.pop();
        } else {
            out.push(' ');
        }
        out.push_str(line);
    }
    out
}

fn plain_text(document: &SourceDocument) -> Result<Vec<ElementOutcome>, ElementError> {
    let text = std::str::from_utf8(document.bytes()).map_err(|_| ElementError::Unsupported {
        extractor: NAME.to_string(),
        reason: "unknown binary format".to_string(),
    })?;
    Ok(text
        .replace("\r\n", "\n")
        .split("\n\n")
        .map(|block| block.lines().map(str::trim).collect::<Vec<_>>().join(" "))
        .filter(|block| !block.trim().is_empty())
        .map(|block| {
            Ok(ExtractedElement::new(
                0,
                BoundingBox::ZERO,
                PLAIN_TEXT_CONFIDENCE,
                ElementContent::Paragraph(block),
            ))
        })
        .collect())
}
