//! Router: characteristics → ordered extractor plan.
//!
//! A pure, total function. The same characteristics and thresholds always
//! give the same plan, and every input gets at least one extractor: an
//! attempt QA can reject beats silently producing nothing.
//!
//! Priority, first match wins:
//!
//! 1. Word-family documents → Word text, then Word tables / images if present
//! 2. scanned → OCR
//! 3. math signal above threshold → native text + math (+ table if dense)
//! 4. table density above threshold → native text + table
//! 5. otherwise → native text

use crate::config::RoutingThresholds;
use crate::model::{DocumentCharacteristics, DocumentKind, ProcessingDefect, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a pluggable extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorId {
    NativeText,
    Ocr,
    Math,
    Table,
    WordText,
    WordTable,
    WordImage,
}

impl ExtractorId {
    pub const ALL: [ExtractorId; 7] = [
        ExtractorId::NativeText,
        ExtractorId::Ocr,
        ExtractorId::Math,
        ExtractorId::Table,
        ExtractorId::WordText,
        ExtractorId::WordTable,
        ExtractorId::WordImage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractorId::NativeText => "native_text",
            ExtractorId::Ocr => "ocr",
            ExtractorId::Math => "math",
            ExtractorId::Table => "table",
            ExtractorId::WordText => "word_text",
            ExtractorId::WordTable => "word_table",
            ExtractorId::WordImage => "word_image",
        }
    }

    /// Primary extractors produce the document's text.
    pub fn is_primary(self) -> bool {
        matches!(
            self,
            ExtractorId::NativeText | ExtractorId::Ocr | ExtractorId::WordText
        )
    }

    /// Severity of a whole-extractor failure.
    pub fn failure_severity(self) -> Severity {
        match self {
            ExtractorId::NativeText | ExtractorId::Ocr | ExtractorId::WordText => Severity::High,
            ExtractorId::Math | ExtractorId::Table | ExtractorId::WordTable => Severity::Medium,
            ExtractorId::WordImage => Severity::Low,
        }
    }
}

impl fmt::Display for ExtractorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which routing rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteRule {
    WordNative,
    Scanned,
    Math,
    Table,
    Standard,
    UnknownType,
}

/// The router's decision, recorded in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub extractors: Vec<ExtractorId>,
    pub rule: RouteRule,
    #[serde(skip)]
    pub defects: Vec<ProcessingDefect>,
}

impl RoutePlan {
    pub fn includes(&self, id: ExtractorId) -> bool {
        self.extractors.contains(&id)
    }
}

/// Decide which extractors run, in order.
pub fn route(characteristics: &DocumentCharacteristics, thresholds: &RoutingThresholds) -> RoutePlan {
    let c = characteristics;

    if c.kind.is_word_family() {
        let mut extractors = vec![ExtractorId::WordText];
        if c.has_tables {
            extractors.push(ExtractorId::WordTable);
        }
        if c.has_images {
            extractors.push(ExtractorId::WordImage);
        }
        return plan(extractors, RouteRule::WordNative);
    }

    if c.kind == DocumentKind::Unknown {
        let mut p = plan(vec![ExtractorId::NativeText], RouteRule::UnknownType);
        p.defects.push(ProcessingDefect::new(
            0,
            "document",
            "Unknown document type; falling back to native text extraction",
            Severity::Medium,
            "router",
        ));
        return p;
    }

    let dense_tables = c.table_density > thresholds.table_density_threshold;

    if c.is_scanned {
        return plan(vec![ExtractorId::Ocr], RouteRule::Scanned);
    }

    if c.math_signal_strength > thresholds.math_signal_threshold {
        let mut extractors = vec![ExtractorId::NativeText, ExtractorId::Math];
        if dense_tables {
            extractors.push(ExtractorId::Table);
        }
        return plan(extractors, RouteRule::Math);
    }

    if dense_tables {
        return plan(vec![ExtractorId::NativeText, ExtractorId::Table], RouteRule::Table);
    }

    plan(vec![ExtractorId::NativeText], RouteRule::Standard)
}

fn plan(extractors: Vec<ExtractorId>, rule: RouteRule) -> RoutePlan {
    RoutePlan {
        extractors,
        rule,
        defects: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf() -> DocumentCharacteristics {
        DocumentCharacteristics::born_digital(DocumentKind::Pdf)
    }

    fn ids(c: &DocumentCharacteristics) -> Vec<ExtractorId> {
        route(c, &RoutingThresholds::default()).extractors
    }

    #[test]
    fn word_always_wins() {
        let c = DocumentCharacteristics {
            is_scanned: true,
            math_signal_strength: 99,
            table_density: 1.0,
            has_tables: true,
            has_images: true,
            ..DocumentCharacteristics::born_digital(DocumentKind::Docx)
        };
        let p = route(&c, &RoutingThresholds::default());
        assert_eq!(p.rule, RouteRule::WordNative);
        assert_eq!(
            p.extractors,
            vec![ExtractorId::WordText, ExtractorId::WordTable, ExtractorId::WordImage]
        );

        let legacy = DocumentCharacteristics::born_digital(DocumentKind::LegacyDoc);
        assert_eq!(ids(&legacy), vec![ExtractorId::WordText]);
    }

    #[test]
    fn scanned_routes_to_ocr_before_math() {
        let c = DocumentCharacteristics {
            is_scanned: true,
            math_signal_strength: 50,
            ..pdf()
        };
        assert_eq!(ids(&c), vec![ExtractorId::Ocr]);
    }

    #[test]
    fn math_threshold_is_strict_and_chains_tables() {
        let at = DocumentCharacteristics {
            math_signal_strength: 5,
            ..pdf()
        };
        assert_eq!(ids(&at), vec![ExtractorId::NativeText]);

        let above = DocumentCharacteristics {
            math_signal_strength: 6,
            ..pdf()
        };
        assert_eq!(ids(&above), vec![ExtractorId::NativeText, ExtractorId::Math]);

        let both = DocumentCharacteristics {
            math_signal_strength: 6,
            table_density: 0.8,
            ..pdf()
        };
        assert_eq!(
            ids(&both),
            vec![ExtractorId::NativeText, ExtractorId::Math, ExtractorId::Table]
        );
    }

    #[test]
    fn table_density_threshold_is_strict() {
        let at = DocumentCharacteristics {
            table_density: 0.5,
            ..pdf()
        };
        assert_eq!(ids(&at), vec![ExtractorId::NativeText]);
        let above = DocumentCharacteristics {
            table_density: 0.51,
            ..pdf()
        };
        assert_eq!(ids(&above), vec![ExtractorId::NativeText, ExtractorId::Table]);
    }

    #[test]
    fn thresholds_are_configurable() {
        let c = DocumentCharacteristics {
            math_signal_strength: 3,
            ..pdf()
        };
        let t = RoutingThresholds {
            math_signal_threshold: 2,
            table_density_threshold: 0.5,
        };
        assert_eq!(route(&c, &t).rule, RouteRule::Math);
    }

    #[test]
    fn unknown_type_falls_back_with_medium_defect() {
        let c = DocumentCharacteristics::born_digital(DocumentKind::Unknown);
        let p = route(&c, &RoutingThresholds::default());
        assert_eq!(p.extractors, vec![ExtractorId::NativeText]);
        assert_eq!(p.defects.len(), 1);
        assert_eq!(p.defects[0].severity, Severity::Medium);
    }

    #[test]
    fn routing_is_deterministic() {
        let c = DocumentCharacteristics {
            math_signal_strength: 7,
            table_density: 0.9,
            languages: vec!["en".into()],
            ..pdf()
        };
        let t = RoutingThresholds::default();
        for _ in 0..10 {
            assert_eq!(route(&c, &t), route(&c, &t));
        }
    }

    #[test]
    fn severities_by_role() {
        assert_eq!(ExtractorId::Ocr.failure_severity(), Severity::High);
        assert_eq!(ExtractorId::Table.failure_severity(), Severity::Medium);
        assert_eq!(ExtractorId::WordImage.failure_severity(), Severity::Low);
        assert!(ExtractorId::WordText.is_primary());
        assert!(!ExtractorId::Math.is_primary());
    }
}
