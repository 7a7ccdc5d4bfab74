//! Scanned pages → vision-model transcription → blocks.
//!
//! Pages are rasterised by pdfium (in `spawn_blocking`), encoded as PNG and
//! sent to the configured vision provider with bounded concurrency. Each
//! page's Markdown is cleaned and split back into headings, list items,
//! pipe-tables, `$$` equations and paragraphs. Positions within the page are
//! not known, so every element carries the page box.
//!
//! A page whose render or transcription fails becomes one element failure;
//! the other pages are kept.

use crate::config::ConversionConfig;
use crate::error::ElementError;
use crate::model::{BoundingBox, DocumentKind, ElementContent, ElementType, ExtractedElement, TableCell};
use crate::pipeline::extract::{ElementOutcome, ExtractionContext, Extractor, ExtractorFuture};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::pdf;
use crate::pipeline::postprocess::{clean_transcription, is_separator_row, is_table_row, split_row};
use crate::pipeline::vision::{encode_page, transcribe_page};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info};

const NAME: &str = "vision-ocr";
const CONFIDENCE: f32 = 0.85;

/// Pages transcribed concurrently.
const PAGE_CONCURRENCY: usize = 4;

pub struct OcrExtractor {
    config: ConversionConfig,
    version: String,
}

impl OcrExtractor {
    pub fn new(config: ConversionConfig) -> Self {
        let version = match &config.vision_model {
            Some(model) => format!("{}+{}", env!("CARGO_PKG_VERSION"), model),
            None => env!("CARGO_PKG_VERSION").to_string(),
        };
        Self { config, version }
    }
}

impl Extractor for OcrExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn extract<'a>(
        &'a self,
        document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        Box::pin(async move {
            let provider = self
                .config
                .vision_provider
                .clone()
                .ok_or_else(|| ElementError::backend(NAME, "no vision provider configured"))?;
            if document.kind() != DocumentKind::Pdf {
                return Err(ElementError::Unsupported {
                    extractor: NAME.to_string(),
                    reason: format!("expected a PDF, got {}", document.kind()),
                });
            }

            let path = document.path().to_path_buf();
            let dir = self.config.pdfium_library_dir.clone();
            let dpi = self.config.ocr_dpi;
            let max_pixels = self.config.ocr_max_pixels;
            let (sizes, pages) = tokio::task::spawn_blocking(move || {
                let sizes = pdf::page_sizes(&path, dir.as_deref())?;
                let pages = pdf::render_pages(&path, dir.as_deref(), dpi, max_pixels, None)?;
                Ok::<_, pdf::PdfBackendError>((sizes, pages))
            })
            .await
            .map_err(|e| ElementError::backend(NAME, format!("render task panicked: {e}")))?
            .map_err(|e| ElementError::backend(NAME, e.to_string()))?;

            let total = pages.len() as u32;
            info!("OCR: transcribing {} page(s)", total);

            let config = &self.config;
            let transcripts: Vec<(u32, Result<String, String>)> = stream::iter(pages)
                .map(|(page_num, rendered)| {
                    let provider = provider.clone();
                    async move {
                        let image = match rendered {
                            Ok(img) => img,
                            Err(e) => return (page_num, Err(e.to_string())),
                        };
                        let data = match encode_page(&image) {
                            Ok(d) => d,
                            Err(e) => return (page_num, Err(format!("PNG encoding failed: {e}"))),
                        };
                        let text = transcribe_page(&provider, page_num, total, data, config).await;
                        (page_num, text)
                    }
                })
                .buffered(PAGE_CONCURRENCY)
                .collect()
                .await;

            let mut outcomes: Vec<ElementOutcome> = Vec::new();
            for (page_num, transcript) in transcripts {
                match transcript {
                    Ok(markdown) => {
                        let bbox = sizes
                            .get(page_num as usize - 1)
                            .map(|(w, h)| BoundingBox::new(0.0, 0.0, *w, *h))
                            .unwrap_or(BoundingBox::ZERO);
                        let blocks = split_blocks(&clean_transcription(&markdown));
                        debug!("OCR page {}: {} block(s)", page_num, blocks.len());
                        outcomes.extend(
                            blocks
                                .into_iter()
                                .map(|c| Ok(ExtractedElement::new(page_num, bbox, CONFIDENCE, c))),
                        );
                    }
                    Err(message) => outcomes.push(Err(ElementError::failed(
                        NAME,
                        page_num,
                        ElementType::Paragraph,
                        message,
                    ))),
                }
            }
            Ok(outcomes)
        })
    }
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*$").unwrap());
static RE_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[-*+•]|\d+[.)])\s+(.+)$").unwrap());

/// Split one page of Markdown into element payloads, in order.
pub fn split_blocks(markdown: &str) -> Vec<ElementContent> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut table: Vec<Vec<TableCell>> = Vec::new();
    let mut equation: Option<Vec<&str>> = None;

    fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<ElementContent>) {
        if !paragraph.is_empty() {
            blocks.push(ElementContent::Paragraph(paragraph.join(" ")));
            paragraph.clear();
        }
    }
    fn flush_table(table: &mut Vec<Vec<TableCell>>, blocks: &mut Vec<ElementContent>) {
        if !table.is_empty() {
            blocks.push(ElementContent::Table(std::mem::take(table)));
        }
    }

    for raw in markdown.lines() {
        let line = raw.trim();

        if let Some(body) = equation.as_mut() {
            if let Some(last) = line.strip_suffix("$$") {
                if !last.trim().is_empty() {
                    body.push(last.trim());
                }
                let latex = body.join(" ");
                blocks.push(ElementContent::Equation(latex));
                equation = None;
            } else if !line.is_empty() {
                body.push(line);
            }
            continue;
        }

        if is_table_row(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            if !(table.len() == 1 && is_separator_row(line)) {
                table.push(split_row(line).into_iter().map(TableCell::new).collect());
            }
            continue;
        }
        flush_table(&mut table, &mut blocks);

        if line.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
        } else if let Some(rest) = line.strip_prefix("$$") {
            flush_paragraph(&mut paragraph, &mut blocks);
            match rest.strip_suffix("$$") {
                Some(inner) => blocks.push(ElementContent::Equation(inner.trim().to_string())),
                None => {
                    let mut body = Vec::new();
                    if !rest.trim().is_empty() {
                        body.push(rest.trim());
                    }
                    equation = Some(body);
                }
            }
        } else if let Some(caps) = RE_HEADING.captures(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(ElementContent::Heading {
                level: caps[1].len() as u8,
                text: caps[2].to_string(),
            });
        } else if let Some(caps) = RE_LIST.captures(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(ElementContent::ListItem(caps[1].to_string()));
        } else {
            paragraph.push(line);
        }
    }

    flush_table(&mut table, &mut blocks);
    flush_paragraph(&mut paragraph, &mut blocks);
    if let Some(body) = equation {
        // Unterminated display math: keep what was read.
        if !body.is_empty() {
            blocks.push(ElementContent::Equation(body.join(" ")));
        }
    }
    blocks
}
