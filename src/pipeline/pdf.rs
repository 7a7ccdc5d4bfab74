//! pdfium backend: text layout, page objects and page images.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state; calling it from a Tokio
//! worker stalls the runtime. Every entry point here is blocking and is
//! called by the extractors and the detector from `spawn_blocking`.
//!
//! pdfium is bound explicitly from the configured library directory (or the
//! system copy). Binding failure is reported as [`PdfBackendError::Unavailable`]
//! so callers can tell "no pdfium here" apart from "this PDF is broken".

use crate::model::BoundingBox;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tool label recorded in provenance for pdfium-backed extractors.
pub const PDFIUM_RENDER_VERSION: &str = "0.8";

/// Failures of the pdfium backend.
#[derive(Debug, Error)]
pub enum PdfBackendError {
    /// The pdfium shared library could not be bound.
    #[error("pdfium unavailable: {0}")]
    Unavailable(String),
    /// The document could not be loaded.
    #[error("cannot load PDF: {0}")]
    Load(String),
    /// One page could not be read.
    #[error("page {page}: {detail}")]
    Page { page: u32, detail: String },
}

/// Bind pdfium from `dir` if given, else from the system library path.
pub fn bind(dir: Option<&Path>) -> Result<Pdfium, PdfBackendError> {
    let bindings = match dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            .or_else(|_| Pdfium::bind_to_system_library()),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PdfBackendError::Unavailable(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

// ── Layout ───────────────────────────────────────────────────────────────

/// One glyph and its loose bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharBox {
    pub ch: char,
    pub bbox: BoundingBox,
}

/// Glyphs sharing a baseline, left to right.
///
/// Wide horizontal gaps are kept as `\t` so table detection can split
/// columns; ordinary word gaps become a single space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub bbox: BoundingBox,
}

impl TextLine {
    /// Text with column gaps flattened to spaces.
    pub fn plain(&self) -> String {
        self.text.replace('\t', " ")
    }

    /// Cells split on column gaps.
    pub fn columns(&self) -> Vec<String> {
        self.text
            .split('\t')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

/// What one page looks like to the layout heuristics.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    /// 1-indexed page number.
    pub page: u32,
    pub width: f32,
    pub height: f32,
    pub lines: Vec<TextLine>,
    /// Vector path objects (rules, boxes); dense grids suggest tables.
    pub path_objects: usize,
    pub image_objects: usize,
}

impl PageLayout {
    pub fn page_box(&self) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, self.width, self.height)
    }

    pub fn char_count(&self) -> usize {
        self.lines
            .iter()
            .map(|l| l.text.chars().filter(|c| !c.is_whitespace()).count())
            .sum()
    }

    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(TextLine::plain)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Read layouts for up to `max_pages` leading pages (all pages when `None`).
///
/// The outer error means the document as a whole is unusable; a page whose
/// text layer cannot be read yields an `Err` in its own slot.
pub fn read_layouts(
    pdf_path: &Path,
    library_dir: Option<&Path>,
    max_pages: Option<usize>,
) -> Result<Vec<Result<PageLayout, PdfBackendError>>, PdfBackendError> {
    let pdfium = bind(library_dir)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PdfBackendError::Load(format!("{e:?}")))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let limit = max_pages.unwrap_or(total).min(total);
    info!("PDF loaded: {} pages, reading layout of {}", total, limit);

    let mut layouts = Vec::with_capacity(limit);
    for (idx, page) in pages.iter().enumerate().take(limit) {
        let page_num = idx as u32 + 1;
        let text_page = match page.text() {
            Ok(t) => t,
            Err(e) => {
                warn!("Page {}: text layer unreadable: {:?}", page_num, e);
                layouts.push(Err(PdfBackendError::Page {
                    page: page_num,
                    detail: format!("text layer unreadable: {e:?}"),
                }));
                continue;
            }
        };

        let mut chars = Vec::new();
        for char_info in text_page.chars().iter() {
            let Ok(bounds) = char_info.loose_bounds() else {
                continue;
            };
            let Some(ch) = char_info.unicode_string().and_then(|s| s.chars().next()) else {
                continue;
            };
            chars.push(CharBox {
                ch,
                bbox: BoundingBox::new(
                    bounds.left().value,
                    bounds.bottom().value,
                    bounds.right().value,
                    bounds.top().value,
                ),
            });
        }

        let mut path_objects = 0;
        let mut image_objects = 0;
        for object in page.objects().iter() {
            match object.object_type() {
                PdfPageObjectType::Path => path_objects += 1,
                PdfPageObjectType::Image => image_objects += 1,
                _ => {}
            }
        }

        let lines = group_lines(chars);
        debug!(
            "Page {}: {} lines, {} paths, {} images",
            page_num,
            lines.len(),
            path_objects,
            image_objects
        );
        layouts.push(Ok(PageLayout {
            page: page_num,
            width: page.width().value,
            height: page.height().value,
            lines,
            path_objects,
            image_objects,
        }));
    }
    Ok(layouts)
}

/// Group glyphs into lines, top of page first.
///
/// PDF y grows upwards, so lines are ordered by descending top edge.
pub fn group_lines(mut chars: Vec<CharBox>) -> Vec<TextLine> {
    chars.retain(|c| !c.ch.is_whitespace() && !c.ch.is_control());
    chars.sort_by(|a, b| b.bbox.y1.total_cmp(&a.bbox.y1));

    let mut rows: Vec<Vec<CharBox>> = Vec::new();
    for c in chars {
        let centre = (c.bbox.y0 + c.bbox.y1) / 2.0;
        let joins_last = rows.last().is_some_and(|row| {
            let ref_box = row[0].bbox;
            let ref_centre = (ref_box.y0 + ref_box.y1) / 2.0;
            let tolerance = ref_box.height().max(c.bbox.height()).max(1.0) * 0.5;
            (centre - ref_centre).abs() <= tolerance
        });
        if joins_last {
            if let Some(row) = rows.last_mut() {
                row.push(c);
            }
        } else {
            rows.push(vec![c]);
        }
    }

    rows.into_iter()
        .map(|mut row| {
            row.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
            let widths: f32 = row.iter().map(|c| (c.bbox.x1 - c.bbox.x0).max(0.5)).sum();
            let avg_width = widths / row.len() as f32;

            let mut text = String::new();
            let mut bbox = BoundingBox::ZERO;
            let mut prev_right: Option<f32> = None;
            for c in &row {
                if let Some(right) = prev_right {
                    let gap = c.bbox.x0 - right;
                    if gap > avg_width * 2.5 {
                        text.push('\t');
                    } else if gap > avg_width * 0.25 {
                        text.push(' ');
                    }
                }
                text.push(c.ch);
                bbox = bbox.union(&c.bbox);
                prev_right = Some(c.bbox.x1);
            }
            TextLine { text, bbox }
        })
        .collect()
}

// ── Rasterisation ────────────────────────────────────────────────────────

/// Render the leading `page_limit` pages (all when `None`) at `dpi`, capping
/// the longest edge at `max_pixels`.
///
/// A page that fails to render yields an `Err` in its slot rather than
/// failing the whole document.
#[allow(clippy::type_complexity)]
pub fn render_pages(
    pdf_path: &Path,
    library_dir: Option<&Path>,
    dpi: u32,
    max_pixels: u32,
    page_limit: Option<usize>,
) -> Result<Vec<(u32, Result<DynamicImage, PdfBackendError>)>, PdfBackendError> {
    let pdfium = bind(library_dir)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PdfBackendError::Load(format!("{e:?}")))?;

    let mut results = Vec::new();
    let limit = page_limit.unwrap_or(usize::MAX);
    for (idx, page) in document.pages().iter().enumerate().take(limit) {
        let page_num = idx as u32 + 1;
        let width_px = target_width(page.width().value, dpi, max_pixels);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width_px as i32)
            .set_maximum_height(max_pixels as i32);
        let rendered = page
            .render_with_config(&render_config)
            .map(|bitmap| bitmap.as_image())
            .map_err(|e| PdfBackendError::Page {
                page: page_num,
                detail: format!("rasterisation failed: {e:?}"),
            });
        match &rendered {
            Ok(img) => debug!("Rendered page {} → {}x{} px", page_num, img.width(), img.height()),
            Err(e) => warn!("{}", e),
        }
        results.push((page_num, rendered));
    }
    Ok(results)
}

/// Pixel width for a page `width_pts` wide (72 points per inch).
pub fn target_width(width_pts: f32, dpi: u32, max_pixels: u32) -> u32 {
    let px = (width_pts / 72.0 * dpi as f32).round() as u32;
    px.clamp(1, max_pixels.max(1))
}

/// Page sizes in points, used as the bounding box of whole-page elements.
pub fn page_sizes(pdf_path: &Path, library_dir: Option<&Path>) -> Result<Vec<(f32, f32)>, PdfBackendError> {
    let pdfium = bind(library_dir)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PdfBackendError::Load(format!("{e:?}")))?;
    Ok(document
        .pages()
        .iter()
        .map(|p| (p.width().value, p.height().value))
        .collect())
}
