//! Quality assurance: metrics and the accept/reject verdict.
//!
//! The verdict never trusts extractor return codes. A run is accepted only
//! when no defect is `high` or `critical` *and* something was actually
//! extracted:
//!
//! ```text
//! success = !defects.any(high | critical) && !has_empty_content
//! ```
//!
//! Metrics are computed where they can be and left `None` otherwise.
//! In [`RunMode::Evaluation`] each metric that misses its threshold adds a
//! `medium` defect; thresholds never accept a run the rule above rejects.

use crate::config::{QualityThresholds, RunMode};
use crate::model::{ExtractionResult, ProcessingDefect, Severity, TableBlock};
use crate::pipeline::extractors::math::is_well_formed;
use crate::pipeline::markdown::strip_markers;
use crate::pipeline::postprocess::{fences_balanced, heading_count, heading_jumps, ragged_tables, table_count};
use crate::pipeline::validate::VisionVerdict;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

const QA_TOOL: &str = "qa";

/// Every field is in `[0, 1]`, or `None` when not measurable for this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub character_error_rate: Option<f64>,
    pub word_error_rate: Option<f64>,
    pub table_structure_score: Option<f64>,
    pub math_token_match_rate: Option<f64>,
    pub structure_accuracy: Option<f64>,
    pub provenance_coverage: Option<f64>,
    /// Set only by the vision cross-check.
    pub vision_confidence: Option<f64>,
    pub content_completeness: Option<f64>,
    pub image_caption_accuracy: Option<f64>,
}

/// What QA needs beyond the extraction result.
#[derive(Debug, Clone, Copy)]
pub struct QaContext<'a> {
    pub mode: RunMode,
    pub thresholds: &'a QualityThresholds,
    /// Ground truth for CER / WER, when the caller has one.
    pub reference_text: Option<&'a str>,
    /// Picks the CER threshold.
    pub is_scanned: bool,
    /// Scores from the vision cross-check, folded in before thresholds.
    pub vision: Option<&'a VisionVerdict>,
}

/// QA output. `defects` holds only what QA itself found.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub metrics: QualityMetrics,
    pub defects: Vec<ProcessingDefect>,
    pub has_empty_content: bool,
    pub success: bool,
}

/// Evaluate one run.
///
/// `markdown` is the rendered, repaired document; `prior` are the defects
/// recorded by every earlier stage.
pub fn evaluate(
    result: &ExtractionResult,
    markdown: &str,
    prior: &[ProcessingDefect],
    ctx: &QaContext<'_>,
) -> Evaluation {
    let mut defects = Vec::new();
    let text = result.text_content();

    let has_empty_content = is_empty_content(result);
    if has_empty_content {
        defects.push(ProcessingDefect::new(
            0,
            "content",
            "EmptyContentDefect: Empty or missing text content",
            Severity::High,
            QA_TOOL,
        ));
    }
    defects.extend(content_checks(result));

    let (cer, wer) = match ctx.reference_text {
        Some(reference) => (
            character_error_rate(&text, reference),
            word_error_rate(&text, reference),
        ),
        None => (None, None),
    };
    let mut metrics = QualityMetrics {
        character_error_rate: cer,
        word_error_rate: wer,
        table_structure_score: table_structure_score(&result.tables),
        math_token_match_rate: math_token_match_rate(result),
        structure_accuracy: structure_accuracy(markdown),
        provenance_coverage: provenance_coverage(result),
        ..Default::default()
    };
    if let Some(verdict) = ctx.vision {
        verdict.fold_into(&mut metrics);
    }

    if metrics.provenance_coverage.is_some_and(|c| c < 1.0) {
        defects.push(ProcessingDefect::new(
            0,
            "provenance",
            format!(
                "MissingProvenance: {} record(s) for {} block(s)",
                result.provenance.len(),
                result.content_block_count()
            ),
            Severity::High,
            QA_TOOL,
        ));
    }

    if ctx.mode == RunMode::Evaluation {
        defects.extend(threshold_misses(&metrics, ctx));
    }

    let success = !has_empty_content
        && !prior
            .iter()
            .chain(defects.iter())
            .any(|d| d.severity.blocks_acceptance());
    debug!(
        "QA: empty={} defects={} success={}",
        has_empty_content,
        defects.len(),
        success
    );

    Evaluation {
        metrics,
        defects,
        has_empty_content,
        success,
    }
}

/// Empty when no text was recovered and there is no table or equation
/// either. Images alone do not count as content.
pub fn is_empty_content(result: &ExtractionResult) -> bool {
    result.text_content().trim().is_empty()
        && result.tables.is_empty()
        && result.math_equations.is_empty()
}

// ── Content checks ───────────────────────────────────────────────────────────

static OCR_CONFUSIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"[0O]{3,}").unwrap(), "0 and O"),
        (Regex::new(r"[1Il]{3,}").unwrap(), "1, I and l"),
        (Regex::new(r"[5S]{3,}").unwrap(), "5 and S"),
        (Regex::new(r"[8B]{3,}").unwrap(), "8 and B"),
    ]
});
static RE_EXCESS_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*\n[ \t]*\n|\S[ \t]{4,}\S").unwrap());

/// Low-severity artefact and whitespace checks over the text blocks.
fn content_checks(result: &ExtractionResult) -> Vec<ProcessingDefect> {
    let mut defects = Vec::new();

    for (re, pair) in OCR_CONFUSIONS.iter() {
        // A run only counts when it mixes a digit with a letter.
        let hit = result.text_blocks.iter().find(|b| {
            re.find_iter(&b.text).any(|m| {
                let s = m.as_str();
                s.chars().any(|c| c.is_ascii_digit()) && s.chars().any(|c| c.is_alphabetic())
            })
        });
        if let Some(block) = hit {
            defects.push(ProcessingDefect::new(
                block.page,
                "ocr_artifact",
                format!("Possible OCR confusion between {pair}"),
                Severity::Low,
                QA_TOOL,
            ));
        }
    }

    if let Some(block) = result
        .text_blocks
        .iter()
        .find(|b| RE_EXCESS_WHITESPACE.is_match(&b.text))
    {
        defects.push(ProcessingDefect::new(
            block.page,
            "content",
            "Excessive whitespace detected",
            Severity::Low,
            QA_TOOL,
        ));
    }
    defects
}

fn threshold_misses(m: &QualityMetrics, ctx: &QaContext<'_>) -> Vec<ProcessingDefect> {
    let t = ctx.thresholds;
    let cer_limit = if ctx.is_scanned {
        t.cer_scanned
    } else {
        t.cer_born_digital
    };

    let mut misses = Vec::new();
    if let Some(cer) = m.character_error_rate.filter(|v| *v > cer_limit) {
        misses.push(format!("character_error_rate {cer:.4} exceeds {cer_limit:.4}"));
    }
    let floors = [
        ("structure_accuracy", m.structure_accuracy, t.structure_accuracy),
        ("table_structure_score", m.table_structure_score, t.table_structure),
        ("math_token_match_rate", m.math_token_match_rate, t.math_token_match),
        ("provenance_coverage", m.provenance_coverage, t.provenance_coverage),
        ("content_completeness", m.content_completeness, t.content_completeness),
    ];
    for (name, value, floor) in floors {
        if let Some(v) = value.filter(|v| *v < floor) {
            misses.push(format!("{name} {v:.4} below {floor:.4}"));
        }
    }

    misses
        .into_iter()
        .map(|msg| {
            ProcessingDefect::new(
                0,
                "metric",
                format!("QualityThreshold: {msg}"),
                Severity::Medium,
                QA_TOOL,
            )
        })
        .collect()
}

// ── Metrics ──────────────────────────────────────────────────────────────────

/// Edit distance between two sequences.
pub fn levenshtein<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let cost = usize::from(x != y);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn normalise(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character edits per reference character, capped at 1.
pub fn character_error_rate(hypothesis: &str, reference: &str) -> Option<f64> {
    let r: Vec<char> = normalise(reference).chars().collect();
    if r.is_empty() {
        return None;
    }
    let h: Vec<char> = normalise(hypothesis).chars().collect();
    Some((levenshtein(&h, &r) as f64 / r.len() as f64).min(1.0))
}

/// Word edits per reference word, capped at 1.
pub fn word_error_rate(hypothesis: &str, reference: &str) -> Option<f64> {
    let r: Vec<&str> = reference.split_whitespace().collect();
    if r.is_empty() {
        return None;
    }
    let h: Vec<&str> = hypothesis.split_whitespace().collect();
    Some((levenshtein(&h, &r) as f64 / r.len() as f64).min(1.0))
}

/// Grid-consistency score averaged over tables.
pub fn table_structure_score(tables: &[TableBlock]) -> Option<f64> {
    if tables.is_empty() {
        return None;
    }
    let total: f64 = tables.iter().map(table_score).sum();
    Some(total / tables.len() as f64)
}

fn table_score(table: &TableBlock) -> f64 {
    if table.rows.is_empty() {
        return 0.0;
    }
    let mut score: f64 = 1.0;

    let widths: Vec<u32> = table
        .rows
        .iter()
        .map(|r| r.iter().map(|c| c.col_span).sum())
        .collect();
    // Rows under a vertical merge are legitimately short.
    if !table.has_merged_cells() && widths.iter().any(|w| *w != widths[0]) {
        score -= 0.2;
    }

    let cells = table.rows.iter().flatten().count();
    let empty = table
        .rows
        .iter()
        .flatten()
        .filter(|c| c.text.trim().is_empty())
        .count();
    if cells > 0 && empty as f64 / cells as f64 > 0.5 {
        score -= 0.3;
    }
    score.max(0.0)
}

/// Share of equations with balanced delimiters and known commands.
pub fn math_token_match_rate(result: &ExtractionResult) -> Option<f64> {
    let equations = &result.math_equations;
    if equations.is_empty() {
        return None;
    }
    let good = equations.iter().filter(|e| is_well_formed(&e.latex)).count();
    Some(good as f64 / equations.len() as f64)
}

/// Markdown structure heuristic; `None` for an empty document.
pub fn structure_accuracy(markdown: &str) -> Option<f64> {
    let md = strip_markers(markdown);
    if md.trim().is_empty() {
        return None;
    }
    let mut score = 1.0;
    let headings = heading_count(&md);
    if headings > 0 {
        score -= 0.3 * heading_jumps(&md).len() as f64 / headings as f64;
    }
    if !fences_balanced(&md) {
        score -= 0.2;
    }
    let tables = table_count(&md);
    if tables > 0 {
        score -= 0.1 * ragged_tables(&md) as f64 / tables as f64;
    }
    Some(f64::max(score, 0.0))
}

/// Provenance records per content block; `None` when nothing was extracted.
pub fn provenance_coverage(result: &ExtractionResult) -> Option<f64> {
    let blocks = result.content_block_count();
    if blocks == 0 {
        return None;
    }
    Some((result.provenance.len() as f64 / blocks as f64).min(1.0))
}
