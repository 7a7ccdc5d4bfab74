//! Markdown renderer: [`ExtractionResult`] → Markdown string.
//!
//! Sections come out in a fixed order: text blocks, tables, display math,
//! images, then `TODO` placeholders for elements that could not be
//! recovered. Tables that are rectangular with no merged cells become GFM
//! pipe-tables; anything else becomes an HTML table so spans survive.
//!
//! Every block can be preceded by a one-line provenance comment:
//!
//! ```text
//! <!-- provenance page=3 bbox=[72.0,640.5,540.0,700.0] tool=pdfium-text@0.8 confidence=0.95 -->
//! ```
//!
//! [`parse_marker`] reads one back. Rendering is a pure function of its
//! input, so the same result always gives byte-identical Markdown.

use crate::model::{
    BoundingBox, ElementType, ExtractionResult, ProvenanceRecord, TableBlock, TableCell,
    TextBlock, UnrecoveredElement,
};

const MARKER_PREFIX: &str = "<!-- provenance ";
const MARKER_SUFFIX: &str = " -->";

/// Render the result. `inline_provenance` adds a marker before each block.
pub fn render(result: &ExtractionResult, inline_provenance: bool) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let marker = |index: usize| -> Option<String> {
        if !inline_provenance {
            return None;
        }
        result.provenance.get(index).map(format_marker)
    };
    let mut push = |provenance: usize, body: String| {
        match marker(provenance) {
            Some(m) => blocks.push(format!("{m}\n{body}")),
            None => blocks.push(body),
        }
    };

    for block in &result.text_blocks {
        push(block.provenance, render_text(block));
    }
    for table in &result.tables {
        let body = if table.is_uniform() {
            render_pipe_table(table)
        } else {
            render_html_table(table)
        };
        push(table.provenance, body);
    }
    for eq in &result.math_equations {
        push(eq.provenance, format!("$$\n{}\n$$", eq.latex.trim()));
    }
    for image in &result.images {
        let alt = image.alt.as_deref().unwrap_or("image").replace(['[', ']'], "");
        push(image.provenance, format!("![{}]({})", alt, image.target));
    }

    if !result.is_empty() {
        blocks.extend(result.unrecovered.iter().map(render_placeholder));
    }

    if blocks.is_empty() {
        return String::new();
    }
    let mut out = blocks.join("\n\n");
    out.push('\n');
    out
}

fn render_text(block: &TextBlock) -> String {
    let text = block.text.trim();
    match block.element_type {
        ElementType::Heading => format!("{} {}", "#".repeat(block.level.clamp(1, 6) as usize), text),
        ElementType::List => format!("- {text}"),
        _ => text.to_string(),
    }
}

fn pipe_cell(cell: &TableCell) -> String {
    cell.text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

/// GFM pipe-table; the first row is the header.
pub fn render_pipe_table(table: &TableBlock) -> String {
    let mut lines = Vec::with_capacity(table.rows.len() + 1);
    for (i, row) in table.rows.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(pipe_cell).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
        if i == 0 {
            lines.push(format!("|{}", " --- |".repeat(row.len())));
        }
    }
    lines.join("\n")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// HTML table carrying `rowspan` / `colspan`; the first row is the header.
pub fn render_html_table(table: &TableBlock) -> String {
    let mut out = String::from("<table>\n");
    for (i, row) in table.rows.iter().enumerate() {
        let tag = if i == 0 { "th" } else { "td" };
        out.push_str("<tr>");
        for cell in row {
            out.push('<');
            out.push_str(tag);
            if cell.row_span > 1 {
                out.push_str(&format!(" rowspan=\"{}\"", cell.row_span));
            }
            if cell.col_span > 1 {
                out.push_str(&format!(" colspan=\"{}\"", cell.col_span));
            }
            out.push('>');
            out.push_str(&escape_html(cell.text.trim()));
            out.push_str(&format!("</{tag}>"));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>");
    out
}

fn render_placeholder(e: &UnrecoveredElement) -> String {
    format!(
        "```text\nTODO: unrecovered {} on page {} at bbox {} ({})\n```",
        e.element_type,
        e.page,
        compact_bbox(&e.bbox),
        e.tool
    )
}

fn compact_bbox(b: &BoundingBox) -> String {
    format!("[{:.1},{:.1},{:.1},{:.1}]", b.x0, b.y0, b.x1, b.y1)
}

fn format_marker(p: &ProvenanceRecord) -> String {
    format!(
        "{MARKER_PREFIX}page={} bbox={} tool={} confidence={:.2}{MARKER_SUFFIX}",
        p.page,
        compact_bbox(&p.bounding_box),
        p.tool,
        p.confidence
    )
}

/// The four fields carried by an inline provenance marker.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineMarker {
    pub page: u32,
    pub bbox: BoundingBox,
    pub tool: String,
    pub confidence: f32,
}

/// Parse one marker line produced by [`render`].
pub fn parse_marker(line: &str) -> Option<InlineMarker> {
    let body = line
        .trim()
        .strip_prefix(MARKER_PREFIX)?
        .strip_suffix(MARKER_SUFFIX)?;

    let mut page = None;
    let mut bbox = None;
    let mut tool = None;
    let mut confidence = None;
    for field in body.split_whitespace() {
        let (key, value) = field.split_once('=')?;
        match key {
            "page" => page = value.parse().ok(),
            "bbox" => {
                let nums: Vec<f32> = value
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .split(',')
                    .map(|n| n.parse().ok())
                    .collect::<Option<_>>()?;
                if nums.len() == 4 {
                    bbox = Some(BoundingBox::new(nums[0], nums[1], nums[2], nums[3]));
                }
            }
            "tool" => tool = Some(value.to_string()),
            "confidence" => confidence = value.parse().ok(),
            _ => return None,
        }
    }
    Some(InlineMarker {
        page: page?,
        bbox: bbox?,
        tool: tool?,
        confidence: confidence?,
    })
}

/// Remove every provenance marker line.
pub fn strip_markers(markdown: &str) -> String {
    markdown
        .lines()
        .filter(|l| !l.trim_start().starts_with(MARKER_PREFIX))
        .collect::<Vec<_>>()
        .join("\n")
}
