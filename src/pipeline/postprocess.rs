//! Post-processing: deterministic Markdown cleanup and structural repair.
//!
//! Two entry points:
//!
//! * [`clean_transcription`] tidies raw vision-OCR output before it is
//!   split into blocks (outer fences, CRLF, invisible characters, invented
//!   image links).
//! * [`repair_structure`] runs on the rendered document before QA.
//!   Unbalanced code fences and tables missing their separator row are
//!   repaired and logged as `low` defects; heading-level jumps and ragged
//!   tables cannot be repaired without guessing and are logged as `medium`.
//!
//! Every rule is a pure `&str → String` pass, so the whole stage is
//! deterministic and each rule is testable on its own.

use crate::model::{ProcessingDefect, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

const REPAIR_TOOL: &str = "structure-repair";

// ── Transcription cleanup ────────────────────────────────────────────────────

/// Clean one page of vision-OCR output.
///
/// Rules (applied in order):
/// 1. Strip outer ```` ```markdown ```` fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Replace invented image links with their alt text
/// 5. Trim trailing whitespace and collapse runs of blank lines
pub fn clean_transcription(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = remove_invented_images(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

/// A scanned page has no linkable assets, so every image link is invented.
fn remove_invented_images(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .to_string()
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Table row helpers ────────────────────────────────────────────────────────

pub fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

/// Matches the `| --- | :-: |` shape. Only meaningful as the second row of a
/// table; elsewhere a dash-only row is data.
pub fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed.contains('-')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

/// Cells of a pipe-table row, outer pipes removed. `\|` is a literal pipe
/// inside a cell and comes back unescaped.
pub fn split_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = match inner.strip_suffix('|') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => inner,
    };

    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}

// ── Structural repair ────────────────────────────────────────────────────────

/// Result of [`repair_structure`].
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub markdown: String,
    pub defects: Vec<ProcessingDefect>,
}

/// Repair what can be repaired, report the rest.
pub fn repair_structure(markdown: &str) -> Repaired {
    let mut defects = Vec::new();

    let (markdown, inserted) = insert_missing_separators(markdown);
    if inserted > 0 {
        defects.push(ProcessingDefect::new(
            0,
            "table",
            format!("StructuralDefect: {inserted} table(s) missing a header separator row (auto-repaired)"),
            Severity::Low,
            REPAIR_TOOL,
        ));
    }

    let (markdown, closed) = close_unbalanced_fence(&markdown);
    if closed {
        defects.push(ProcessingDefect::new(
            0,
            "markdown",
            "StructuralDefect: unbalanced code fence (auto-repaired by closing it)",
            Severity::Low,
            REPAIR_TOOL,
        ));
    }

    let jumps = heading_jumps(&markdown);
    if !jumps.is_empty() {
        defects.push(ProcessingDefect::new(
            0,
            "heading",
            format!(
                "StructuralDefect: {} heading level jump(s), first at '{}'",
                jumps.len(),
                jumps[0]
            ),
            Severity::Medium,
            REPAIR_TOOL,
        ));
    }

    let ragged = ragged_tables(&markdown);
    if ragged > 0 {
        defects.push(ProcessingDefect::new(
            0,
            "table",
            format!("StructuralDefect: {ragged} pipe-table(s) with inconsistent column counts"),
            Severity::Medium,
            REPAIR_TOOL,
        ));
    }

    Repaired { markdown, defects }
}

/// Lines outside fenced code blocks, paired with their text.
fn unfenced_lines(markdown: &str) -> impl Iterator<Item = &str> {
    let mut in_fence = false;
    markdown.lines().filter(move |line| {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            return false;
        }
        !in_fence
    })
}

/// Group consecutive table rows outside code fences.
fn table_blocks(markdown: &str) -> Vec<Vec<&str>> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in unfenced_lines(markdown) {
        if is_table_row(line) {
            current.push(line);
        } else if !current.is_empty() {
            blocks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Insert a separator after the header of any multi-row table lacking one.
fn insert_missing_separators(markdown: &str) -> (String, usize) {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut inserted = 0;
    let mut in_fence = false;
    // Position of the current line inside a run of table rows.
    let mut row_index = 0usize;

    for (i, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        out.push(line.to_string());
        if in_fence || !is_table_row(line) {
            row_index = 0;
            continue;
        }

        let next = lines.get(i + 1).copied().unwrap_or("");
        if row_index == 0 && is_table_row(next) && !is_separator_row(next) {
            let cols = split_row(line).len().max(1);
            out.push(format!("|{}", " --- |".repeat(cols)));
            inserted += 1;
        }
        row_index += 1;
    }

    let mut joined = out.join("\n");
    if markdown.ends_with('\n') {
        joined.push('\n');
    }
    (joined, inserted)
}

/// Append a closing fence when an odd number of fences is open.
fn close_unbalanced_fence(markdown: &str) -> (String, bool) {
    let fences = markdown
        .lines()
        .filter(|l| l.trim_start().starts_with("```"))
        .count();
    if fences % 2 == 0 {
        return (markdown.to_string(), false);
    }
    let mut out = markdown.trim_end_matches('\n').to_string();
    out.push_str("\n```\n");
    (out, true)
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+\S").unwrap());

/// Headings that go more than one level deeper than their predecessor.
pub fn heading_jumps(markdown: &str) -> Vec<String> {
    let mut prev: Option<usize> = None;
    let mut jumps = Vec::new();
    for line in unfenced_lines(markdown) {
        if let Some(caps) = RE_HEADING.captures(line) {
            let level = caps[1].len();
            if prev.is_some_and(|p| level > p + 1) {
                jumps.push(line.trim().to_string());
            }
            prev = Some(level);
        }
    }
    jumps
}

/// Number of headings outside code fences.
pub fn heading_count(markdown: &str) -> usize {
    unfenced_lines(markdown)
        .filter(|l| RE_HEADING.is_match(l))
        .count()
}

/// Pipe-tables whose rows disagree on the number of cells.
pub fn ragged_tables(markdown: &str) -> usize {
    table_blocks(markdown)
        .iter()
        .filter(|rows| {
            let mut widths = rows.iter().map(|r| split_row(r).len());
            let first = widths.next().unwrap_or(0);
            widths.any(|w| w != first)
        })
        .count()
}

/// Number of pipe-tables outside code fences.
pub fn table_count(markdown: &str) -> usize {
    table_blocks(markdown).len()
}

/// True when the number of code fences is even.
pub fn fences_balanced(markdown: &str) -> bool {
    markdown
        .lines()
        .filter(|l| l.trim_start().starts_with("```"))
        .count()
        % 2
        == 0
}
