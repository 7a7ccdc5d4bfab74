//! DOCX backend: read `word/document.xml` into an ordered list of blocks.
//!
//! DOCX files are ZIP archives holding Open XML. Body paragraphs, tables and
//! inline images are read in document order; paragraph styles named
//! `Heading N` (or `Title`) become headings and numbered paragraphs become
//! list items. Table cells keep their `gridSpan` / `vMerge` structure as
//! column and row spans, so the renderer can tell merged tables apart.

use crate::model::TableCell;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

const DOCUMENT_XML: &str = "word/document.xml";
const DOCUMENT_RELS: &str = "word/_rels/document.xml.rels";

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("cannot open DOCX container: {0}")]
    Container(String),
    #[error("{DOCUMENT_XML} missing from container")]
    MissingBody,
    #[error("XML parse error at byte {position}: {detail}")]
    Xml { position: usize, detail: String },
}

/// Paragraph flavour derived from its properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParagraphStyle {
    Body,
    Heading(u8),
    ListItem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocxBlock {
    Paragraph { style: ParagraphStyle, text: String },
    Table(Vec<Vec<TableCell>>),
    Image { target: String, alt: Option<String> },
}

/// Parsed body, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocxContent {
    pub blocks: Vec<DocxBlock>,
    /// True when parsing stopped at the paragraph limit.
    pub truncated: bool,
}

impl DocxContent {
    pub fn paragraphs(&self) -> impl Iterator<Item = (&ParagraphStyle, &str)> {
        self.blocks.iter().filter_map(|b| match b {
            DocxBlock::Paragraph { style, text } => Some((style, text.as_str())),
            _ => None,
        })
    }

    pub fn table_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b, DocxBlock::Table(_)))
            .count()
    }

    pub fn image_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b, DocxBlock::Image { .. }))
            .count()
    }
}

/// Parse a DOCX held in memory. `max_paragraphs` bounds the work for sampling.
pub fn parse(bytes: &[u8], max_paragraphs: Option<usize>) -> Result<DocxContent, DocxError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| DocxError::Container(e.to_string()))?;

    let body = read_entry(&mut archive, DOCUMENT_XML)?.ok_or(DocxError::MissingBody)?;
    let rels = match read_entry(&mut archive, DOCUMENT_RELS)? {
        Some(xml) => parse_relationships(&xml)?,
        None => HashMap::new(),
    };

    let content = parse_body(&body, &rels, max_paragraphs)?;
    debug!(
        "DOCX parsed: {} blocks ({} tables, {} images, truncated={})",
        content.blocks.len(),
        content.table_count(),
        content.image_count(),
        content.truncated
    );
    Ok(content)
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, DocxError> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut content = String::new();
            file.read_to_string(&mut content)
                .map_err(|e| DocxError::Container(format!("failed to read {name}: {e}")))?;
            Ok(Some(content))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(DocxError::Container(e.to_string())),
    }
}

/// Relationship id → archive path of the target.
fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, DocxError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (get_attribute(e, "Id"), get_attribute(e, "Target")) {
                    let path = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("word/{target}"),
                    };
                    rels.insert(id, path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DocxError::Xml {
                    position: reader.buffer_position(),
                    detail: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VMerge {
    None,
    Restart,
    Continue,
}

#[derive(Debug)]
struct RawCell {
    text: String,
    col_span: u32,
    vmerge: VMerge,
}

impl Default for RawCell {
    fn default() -> Self {
        Self {
            text: String::new(),
            col_span: 1,
            vmerge: VMerge::None,
        }
    }
}

#[derive(Debug, Default)]
struct ParaState {
    text: String,
    heading: Option<u8>,
    list: bool,
}

#[derive(Debug, Default)]
struct TableState {
    rows: Vec<Vec<RawCell>>,
    row: Vec<RawCell>,
    cell: Option<RawCell>,
}

fn parse_body(
    xml: &str,
    rels: &HashMap<String, String>,
    max_paragraphs: Option<usize>,
) -> Result<DocxContent, DocxError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut content = DocxContent::default();
    let mut table_depth = 0usize;
    let mut table: Option<TableState> = None;
    let mut para: Option<ParaState> = None;
    let mut in_text = false;
    let mut pending_alt: Option<String> = None;
    let mut top_level_paragraphs = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| DocxError::Xml {
            position: reader.buffer_position(),
            detail: e.to_string(),
        })?;
        match event {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        table = Some(TableState::default());
                    }
                }
                b"tr" if table_depth == 1 => {
                    if let Some(t) = table.as_mut() {
                        t.row = Vec::new();
                    }
                }
                b"tc" if table_depth == 1 => {
                    if let Some(t) = table.as_mut() {
                        t.cell = Some(RawCell::default());
                    }
                }
                b"p" => para = Some(ParaState::default()),
                b"t" => in_text = true,
                _ => apply_property(e, table_depth, &mut table, &mut para),
            },
            Event::Empty(ref e) => match e.local_name().as_ref() {
                b"tab" | b"br" | b"cr" => {
                    if let Some(p) = para.as_mut() {
                        p.text.push(' ');
                    }
                }
                b"docPr" => pending_alt = get_attribute(e, "descr").filter(|d| !d.trim().is_empty()),
                b"blip" => {
                    if let Some(target) = get_attribute(e, "embed").and_then(|id| rels.get(&id)) {
                        content.blocks.push(DocxBlock::Image {
                            target: target.clone(),
                            alt: pending_alt.take(),
                        });
                    }
                }
                _ => apply_property(e, table_depth, &mut table, &mut para),
            },
            Event::Text(ref e) if in_text => {
                if let Some(p) = para.as_mut() {
                    let text = e.unescape().map_err(|err| DocxError::Xml {
                        position: reader.buffer_position(),
                        detail: err.to_string(),
                    })?;
                    p.text.push_str(&text);
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if para.is_some() => {
                    let p = para.take().unwrap_or_default();
                    let text = p.text.split_whitespace().collect::<Vec<_>>().join(" ");
                    if table_depth > 0 {
                        if let Some(cell) = table.as_mut().and_then(|t| t.cell.as_mut()) {
                            if !text.is_empty() {
                                if !cell.text.is_empty() {
                                    cell.text.push(' ');
                                }
                                cell.text.push_str(&text);
                            }
                        }
                    } else if !text.is_empty() {
                        let style = match (p.heading, p.list) {
                            (Some(level), _) => ParagraphStyle::Heading(level),
                            (None, true) => ParagraphStyle::ListItem,
                            (None, false) => ParagraphStyle::Body,
                        };
                        content.blocks.push(DocxBlock::Paragraph { style, text });
                        top_level_paragraphs += 1;
                        if max_paragraphs.is_some_and(|max| top_level_paragraphs >= max) {
                            content.truncated = true;
                            break;
                        }
                    }
                }
                b"tc" if table_depth == 1 => {
                    if let Some(t) = table.as_mut() {
                        if let Some(cell) = t.cell.take() {
                            t.row.push(cell);
                        }
                    }
                }
                b"tr" if table_depth == 1 => {
                    if let Some(t) = table.as_mut() {
                        let row = std::mem::take(&mut t.row);
                        t.rows.push(row);
                    }
                }
                b"tbl" => {
                    if table_depth == 1 {
                        if let Some(t) = table.take() {
                            let rows = resolve_spans(t.rows);
                            if !rows.is_empty() {
                                content.blocks.push(DocxBlock::Table(rows));
                            }
                        }
                    }
                    table_depth = table_depth.saturating_sub(1);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(content)
}

/// Paragraph and cell properties that may arrive as start or empty tags.
fn apply_property(
    e: &BytesStart,
    table_depth: usize,
    table: &mut Option<TableState>,
    para: &mut Option<ParaState>,
) {
    match e.local_name().as_ref() {
        b"pStyle" => {
            if let (Some(p), Some(val)) = (para.as_mut(), get_attribute(e, "val")) {
                p.heading = heading_level(&val);
            }
        }
        b"numPr" => {
            if let Some(p) = para.as_mut() {
                p.list = true;
            }
        }
        b"gridSpan" if table_depth == 1 => {
            if let Some(cell) = table.as_mut().and_then(|t| t.cell.as_mut()) {
                cell.col_span = get_attribute(e, "val")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1)
                    .max(1);
            }
        }
        b"vMerge" if table_depth == 1 => {
            if let Some(cell) = table.as_mut().and_then(|t| t.cell.as_mut()) {
                cell.vmerge = match get_attribute(e, "val").as_deref() {
                    Some("restart") => VMerge::Restart,
                    _ => VMerge::Continue,
                };
            }
        }
        _ => {}
    }
}

/// `Heading3` / `heading 3` → 3, `Title` → 1, anything else → `None`.
fn heading_level(style: &str) -> Option<u8> {
    let lower = style.to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    if !lower.starts_with("heading") {
        return None;
    }
    let digits: String = lower.chars().filter(|c| c.is_ascii_digit()).collect();
    Some(digits.parse::<u8>().unwrap_or(1).clamp(1, 6))
}

/// Turn vertical-merge continuation cells into row spans on the cell above.
fn resolve_spans(rows: Vec<Vec<RawCell>>) -> Vec<Vec<TableCell>> {
    let mut out: Vec<Vec<TableCell>> = Vec::with_capacity(rows.len());
    // grid column → (row index, cell index) of the cell currently open there
    let mut open: HashMap<usize, (usize, usize)> = HashMap::new();

    for raw_row in rows {
        let row_idx = out.len();
        let mut row = Vec::with_capacity(raw_row.len());
        let mut grid_col = 0usize;
        for raw in raw_row {
            let span = raw.col_span as usize;
            match raw.vmerge {
                VMerge::Continue => {
                    if let Some(&(r, c)) = open.get(&grid_col) {
                        out[r][c].row_span += 1;
                    }
                }
                VMerge::Restart | VMerge::None => {
                    let cell_idx = row.len();
                    row.push(TableCell::spanning(raw.text, 1, raw.col_span));
                    if raw.vmerge == VMerge::Restart {
                        open.insert(grid_col, (row_idx, cell_idx));
                    } else {
                        open.remove(&grid_col);
                    }
                }
            }
            grid_col += span;
        }
        out.push(row);
    }
    out.retain(|r| !r.is_empty());
    out
}

/// Attribute value by local name, ignoring the namespace prefix.
fn get_attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

/// Build a minimal DOCX around a `<w:body>` fragment. Test fixture helper.
#[cfg(test)]
pub(crate) fn build_docx(body: &str, rels: Option<&str>) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = || SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.start_file("[Content_Types].xml", opts()).unwrap();
    writer
        .write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
        .unwrap();
    writer.start_file(DOCUMENT_XML, opts()).unwrap();
    write!(
        writer,
        r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:wp="http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing"><w:body>{body}</w:body></w:document>"#
    )
    .unwrap();
    if let Some(rels) = rels {
        writer.start_file(DOCUMENT_RELS, opts()).unwrap();
        write!(
            writer,
            r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
        )
        .unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> String {
        format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
    }

    fn styled(style: &str, text: &str) -> String {
        format!(r#"<w:p><w:pPr><w:pStyle w:val="{style}"/></w:pPr><w:r><w:t>{text}</w:t></w:r></w:p>"#)
    }

    #[test]
    fn paragraphs_headings_and_lists_in_order() {
        let body = format!(
            "{}{}{}{}",
            styled("Heading2", "Scope"),
            p("First &amp; only."),
            r#"<w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="1"/></w:numPr></w:pPr><w:r><w:t>item</w:t></w:r></w:p>"#,
            p("  split  "),
        );
        let content = parse(&build_docx(&body, None), None).unwrap();
        let paras: Vec<_> = content.paragraphs().collect();
        assert_eq!(paras.len(), 4);
        assert_eq!(paras[0], (&ParagraphStyle::Heading(2), "Scope"));
        assert_eq!(paras[1], (&ParagraphStyle::Body, "First & only."));
        assert_eq!(paras[2], (&ParagraphStyle::ListItem, "item"));
        assert_eq!(paras[3].1, "split");
    }

    #[test]
    fn runs_in_one_paragraph_are_concatenated() {
        let body = r#"<w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>"#;
        let content = parse(&build_docx(body, None), None).unwrap();
        assert_eq!(content.paragraphs().next().unwrap().1, "Hello world");
    }

    #[test]
    fn table_cells_do_not_leak_into_paragraphs() {
        let body = format!(
            "<w:tbl><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>{}",
            p("A"),
            p("B"),
            p("1"),
            p("2"),
            p("after")
        );
        let content = parse(&build_docx(&body, None), None).unwrap();
        assert_eq!(content.table_count(), 1);
        assert_eq!(content.paragraphs().count(), 1);
        let DocxBlock::Table(rows) = &content.blocks[0] else {
            panic!("expected table first");
        };
        assert_eq!(rows[0][1].text, "B");
        assert_eq!(rows[1][0].text, "1");
    }

    #[test]
    fn merged_cells_become_spans() {
        let body = format!(
            concat!(
                "<w:tbl>",
                "<w:tr><w:tc><w:tcPr><w:gridSpan w:val=\"2\"/></w:tcPr>{}</w:tc></w:tr>",
                "<w:tr><w:tc><w:tcPr><w:vMerge w:val=\"restart\"/></w:tcPr>{}</w:tc><w:tc>{}</w:tc></w:tr>",
                "<w:tr><w:tc><w:tcPr><w:vMerge/></w:tcPr>{}</w:tc><w:tc>{}</w:tc></w:tr>",
                "</w:tbl>"
            ),
            p("Header"),
            p("Group"),
            p("x"),
            p(""),
            p("y")
        );
        let content = parse(&build_docx(&body, None), None).unwrap();
        let DocxBlock::Table(rows) = &content.blocks[0] else {
            panic!("expected table");
        };
        assert_eq!(rows[0][0].col_span, 2);
        assert_eq!(rows[1][0].row_span, 2);
        assert_eq!(rows[2].len(), 1);
        assert_eq!(rows[2][0].text, "y");
    }

    #[test]
    fn images_resolve_through_relationships() {
        let body = r#"<w:p><w:r><w:drawing><wp:inline><wp:docPr id="1" name="Picture 1" descr="Org chart"/><a:graphic><a:graphicData><a:blip r:embed="rId7"/></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"#;
        let rels = r#"<Relationship Id="rId7" Type="image" Target="media/image1.png"/>"#;
        let content = parse(&build_docx(body, Some(rels)), None).unwrap();
        assert_eq!(
            content.blocks,
            vec![DocxBlock::Image {
                target: "word/media/image1.png".into(),
                alt: Some("Org chart".into())
            }]
        );
    }

    #[test]
    fn paragraph_limit_truncates() {
        let body: String = (0..10).map(|i| p(&format!("para {i}"))).collect();
        let content = parse(&build_docx(&body, None), Some(3)).unwrap();
        assert_eq!(content.paragraphs().count(), 3);
        assert!(content.truncated);
    }

    #[test]
    fn missing_body_is_an_error() {
        use std::io::Write;
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<x/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert!(matches!(parse(&bytes, None), Err(DocxError::MissingBody)));
    }

    #[test]
    fn heading_style_names() {
        assert_eq!(heading_level("Heading1"), Some(1));
        assert_eq!(heading_level("heading 3"), Some(3));
        assert_eq!(heading_level("Title"), Some(1));
        assert_eq!(heading_level("Normal"), None);
    }
}
