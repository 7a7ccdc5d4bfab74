//! Characteristic detector: a bounded sample of the document → routing signals.
//!
//! PDFs are probed through pdfium on the first `sample_pages` pages; DOCX
//! bodies on the first `sample_paragraphs` paragraphs. Caller hints override
//! every detected field, and when the hints already fix every field the
//! router reads, the document is not sampled at all.
//!
//! A document that cannot be opened is `DocumentUnreadable`. A missing
//! pdfium library is not the document's fault: the detector then assumes a
//! born-digital PDF and records a `medium` defect.

use crate::config::ConversionConfig;
use crate::error::DocRipError;
use crate::model::{
    DocumentCharacteristics, DocumentHints, DocumentKind, ProcessingDefect, Severity,
};
use crate::pipeline::docx::{self, DocxContent};
use crate::pipeline::extractors::math::distinct_math_glyphs;
use crate::pipeline::extractors::table::tabular_runs;
use crate::pipeline::input::SourceDocument;
use crate::pipeline::pdf::{self, PageLayout, PdfBackendError};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DETECTOR: &str = "detector";

/// Vector path objects on one page above which a ruled grid is assumed.
const TABLE_PATH_OBJECTS: usize = 24;

/// Share of letters a script needs before its language is reported.
const MIN_SCRIPT_SHARE: f32 = 0.1;

/// What the detector concluded, plus anything it noticed on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub characteristics: DocumentCharacteristics,
    pub defects: Vec<ProcessingDefect>,
    /// False when the hints made sampling unnecessary.
    pub sampled: bool,
}

/// Inspect `document` and merge `hints` over the result.
pub async fn detect(
    document: &Arc<SourceDocument>,
    hints: &DocumentHints,
    config: &ConversionConfig,
) -> Result<DetectionOutcome, DocRipError> {
    let kind = document.kind();
    if hints.is_complete() {
        debug!("Hints fix every routing field; skipping sampling");
        return Ok(DetectionOutcome {
            characteristics: DocumentCharacteristics::born_digital(kind).with_hints(hints),
            defects: Vec::new(),
            sampled: false,
        });
    }

    let mut defects = Vec::new();
    let detected = match kind {
        DocumentKind::Pdf => probe_pdf(document, config, &mut defects).await?,
        DocumentKind::Docx => probe_docx(document, config).await?,
        DocumentKind::LegacyDoc | DocumentKind::Unknown => DocumentCharacteristics::born_digital(kind),
    };

    let characteristics = detected.with_hints(hints);
    info!(
        "Detected {}: scanned={}, math={}, table_density={:.2}, languages={:?}",
        kind,
        characteristics.is_scanned,
        characteristics.math_signal_strength,
        characteristics.table_density,
        characteristics.languages
    );
    Ok(DetectionOutcome {
        characteristics,
        defects,
        sampled: true,
    })
}

async fn probe_pdf(
    document: &Arc<SourceDocument>,
    config: &ConversionConfig,
    defects: &mut Vec<ProcessingDefect>,
) -> Result<DocumentCharacteristics, DocRipError> {
    let path = document.path().to_path_buf();
    let dir = config.pdfium_library_dir.clone();
    let sample = config.sample_pages;
    let sampled = tokio::task::spawn_blocking(move || pdf::read_layouts(&path, dir.as_deref(), Some(sample)))
        .await
        .map_err(|e| DocRipError::Internal(format!("detection task panicked: {e}")))?;

    let slots = match sampled {
        Ok(slots) => slots,
        Err(PdfBackendError::Unavailable(reason)) => {
            warn!("pdfium unavailable, assuming born-digital: {}", reason);
            defects.push(ProcessingDefect::new(
                0,
                "document",
                format!("Detection skipped, pdfium unavailable ({reason}); assuming born-digital"),
                Severity::Medium,
                DETECTOR,
            ));
            return Ok(DocumentCharacteristics::born_digital(DocumentKind::Pdf));
        }
        Err(e) => return Err(DocRipError::unreadable(document.identifier(), e.to_string())),
    };

    let pages: Vec<PageLayout> = slots
        .into_iter()
        .filter_map(|slot| match slot {
            Ok(page) => Some(page),
            Err(e) => {
                warn!("Detection could not sample {}", e);
                None
            }
        })
        .collect();

    if pages.is_empty() {
        defects.push(ProcessingDefect::new(
            0,
            "document",
            "Detection sampled no readable pages; assuming born-digital",
            Severity::Medium,
            DETECTOR,
        ));
        return Ok(DocumentCharacteristics::born_digital(DocumentKind::Pdf));
    }
    Ok(pdf_characteristics(&pages, config))
}

/// Characteristics of a sampled set of PDF pages.
pub fn pdf_characteristics(pages: &[PageLayout], config: &ConversionConfig) -> DocumentCharacteristics {
    let sampled = pages.len().max(1);
    let total_chars: usize = pages.iter().map(PageLayout::char_count).sum();
    let has_text_layer = total_chars > 0;
    let avg_chars = total_chars / sampled;
    let is_scanned = !has_text_layer || avg_chars < config.scanned_chars_per_page;

    let texts: Vec<String> = pages.iter().map(PageLayout::text).collect();
    let math_signal_strength = texts.iter().map(|t| distinct_math_glyphs(t)).sum();

    let tabular_pages = pages
        .iter()
        .filter(|p| !tabular_runs(&p.lines).is_empty() || p.path_objects >= TABLE_PATH_OBJECTS)
        .count();
    let table_density = tabular_pages as f32 / sampled as f32;

    let mut c = DocumentCharacteristics {
        kind: DocumentKind::Pdf,
        is_scanned,
        has_text_layer,
        table_density,
        math_signal_strength,
        languages: detect_languages(&texts.join("\n")),
        estimated_domain: None,
        has_tables: tabular_pages > 0,
        has_images: pages.iter().any(|p| p.image_objects > 0),
    };
    c.estimated_domain = Some(estimate_domain(&c, config).to_string());
    debug!(
        "PDF sample: {} page(s), {} chars avg, {} tabular",
        sampled, avg_chars, tabular_pages
    );
    c
}

async fn probe_docx(
    document: &Arc<SourceDocument>,
    config: &ConversionConfig,
) -> Result<DocumentCharacteristics, DocRipError> {
    let doc = Arc::clone(document);
    let limit = config.sample_paragraphs;
    let content = tokio::task::spawn_blocking(move || docx::parse(doc.bytes(), Some(limit)))
        .await
        .map_err(|e| DocRipError::Internal(format!("detection task panicked: {e}")))?
        .map_err(|e| DocRipError::unreadable(document.identifier(), e.to_string()))?;
    Ok(docx_characteristics(&content, config))
}

/// Characteristics of a sampled DOCX body.
pub fn docx_characteristics(content: &DocxContent, config: &ConversionConfig) -> DocumentCharacteristics {
    let tables = content.table_count();
    let paragraphs = content.paragraphs().count();
    let table_density = if tables + paragraphs == 0 {
        0.0
    } else {
        tables as f32 / (tables + paragraphs) as f32
    };
    let text: String = content
        .paragraphs()
        .map(|(_, t)| t)
        .collect::<Vec<_>>()
        .join("\n");

    let mut c = DocumentCharacteristics {
        kind: DocumentKind::Docx,
        is_scanned: false,
        has_text_layer: true,
        table_density,
        math_signal_strength: distinct_math_glyphs(&text),
        languages: detect_languages(&text),
        estimated_domain: None,
        has_tables: tables > 0,
        has_images: content.image_count() > 0,
    };
    c.estimated_domain = Some(estimate_domain(&c, config).to_string());
    c
}

fn estimate_domain(c: &DocumentCharacteristics, config: &ConversionConfig) -> &'static str {
    if c.math_signal_strength > config.routing.math_signal_threshold {
        "academic"
    } else if c.table_density > config.routing.table_density_threshold {
        "business"
    } else {
        "general"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Latin,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Han,
    Kana,
    Hangul,
}

fn script(c: char) -> Option<Script> {
    match c {
        'A'..='Z' | 'a'..='z' | '\u{00C0}'..='\u{024F}' => Some(Script::Latin),
        '\u{0370}'..='\u{03FF}' => Some(Script::Greek),
        '\u{0400}'..='\u{04FF}' => Some(Script::Cyrillic),
        '\u{0590}'..='\u{05FF}' => Some(Script::Hebrew),
        '\u{0600}'..='\u{06FF}' => Some(Script::Arabic),
        '\u{3040}'..='\u{30FF}' => Some(Script::Kana),
        '\u{4E00}'..='\u{9FFF}' => Some(Script::Han),
        '\u{AC00}'..='\u{D7AF}' => Some(Script::Hangul),
        _ => None,
    }
}

/// ISO 639-1 codes by dominant script, most frequent first.
///
/// Han counts as Japanese when any kana is present.
pub fn detect_languages(text: &str) -> Vec<String> {
    let mut counts: Vec<(Script, usize)> = Vec::new();
    for s in text.chars().filter_map(script) {
        match counts.iter_mut().find(|(k, _)| *k == s) {
            Some((_, n)) => *n += 1,
            None => counts.push((s, 1)),
        }
    }
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return Vec::new();
    }
    let japanese = counts.iter().any(|(s, _)| *s == Script::Kana);

    let mut by_lang: Vec<(&'static str, usize)> = Vec::new();
    for (s, n) in counts {
        let code = match s {
            Script::Latin => "en",
            Script::Cyrillic => "ru",
            Script::Greek => "el",
            Script::Arabic => "ar",
            Script::Hebrew => "he",
            Script::Han if japanese => "ja",
            Script::Han => "zh",
            Script::Kana => "ja",
            Script::Hangul => "ko",
        };
        match by_lang.iter_mut().find(|(c, _)| *c == code) {
            Some((_, m)) => *m += n,
            None => by_lang.push((code, n)),
        }
    }
    by_lang.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    by_lang
        .into_iter()
        .filter(|(_, n)| *n as f32 / total as f32 >= MIN_SCRIPT_SHARE)
        .map(|(code, _)| code.to_string())
        .collect()
}
