//! Compliance stage: PII redaction and classification banner.
//!
//! Matched spans are replaced with fixed tokens such as `[REDACTED_EMAIL]`.
//! The audit trail records where each substitution happened and what
//! replaced it, never the original text. Provenance marker lines are left
//! alone, and provenance previews are redacted with the same rules.
//!
//! Applying the stage to its own output changes nothing: the tokens match
//! no pattern and an existing banner is never stamped twice.

use crate::config::{Classification, CompliancePolicy};
use crate::model::ProvenanceRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use tracing::{debug, info};

const BANNER_PREFIX: &str = "**CLASSIFICATION: ";
const MARKER_PREFIX: &str = "<!-- provenance ";

/// Category of a redacted span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Url,
    Email,
    Ssn,
    CreditCard,
    IpAddress,
    Phone,
}

impl PiiKind {
    pub fn token(self) -> &'static str {
        match self {
            PiiKind::Url => "[REDACTED_URL]",
            PiiKind::Email => "[REDACTED_EMAIL]",
            PiiKind::Ssn => "[REDACTED_SSN]",
            PiiKind::CreditCard => "[REDACTED_CC]",
            PiiKind::IpAddress => "[REDACTED_IP]",
            PiiKind::Phone => "[REDACTED_PHONE]",
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PiiKind::Url => "url",
            PiiKind::Email => "email",
            PiiKind::Ssn => "ssn",
            PiiKind::CreditCard => "credit_card",
            PiiKind::IpAddress => "ip_address",
            PiiKind::Phone => "phone",
        })
    }
}

static RE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[-\w.]+(?::\d+)?(?:/[\w/.%~-]*)?(?:\?[\w&=%.-]*)?(?:#[\w.-]*)?").unwrap()
});
static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());
static RE_SSN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static RE_CC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").unwrap());
static RE_IP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap());
static RE_PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s]?)\d{3}[-.]?\d{4}\b").unwrap()
});

/// Patterns in priority order. An earlier pattern wins an overlap.
fn patterns() -> [(PiiKind, &'static Regex); 6] {
    [
        (PiiKind::Url, &RE_URL),
        (PiiKind::Email, &RE_EMAIL),
        (PiiKind::Ssn, &RE_SSN),
        (PiiKind::CreditCard, &RE_CC),
        (PiiKind::IpAddress, &RE_IP),
        (PiiKind::Phone, &RE_PHONE),
    ]
}

/// One substitution. Offsets are byte positions in the Markdown handed to
/// [`apply`], before any banner was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionEntry {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

/// Output of [`apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComplianceOutcome {
    pub markdown: String,
    pub provenance: Vec<ProvenanceRecord>,
    pub redactions: Vec<RedactionEntry>,
}

/// Redact and stamp according to `policy`.
pub fn apply(
    markdown: &str,
    provenance: &[ProvenanceRecord],
    policy: &CompliancePolicy,
) -> ComplianceOutcome {
    let (mut text, redactions, provenance) = if policy.pii_redaction {
        let (text, redactions) = redact(markdown);
        let provenance = provenance
            .iter()
            .map(|p| ProvenanceRecord {
                content_preview: redact(&p.content_preview).0,
                ..p.clone()
            })
            .collect();
        (text, redactions, provenance)
    } else {
        (markdown.to_string(), Vec::new(), provenance.to_vec())
    };

    if let Some(banner) = banner(policy.classification) {
        if !text.trim().is_empty() && !text.starts_with(BANNER_PREFIX) {
            text.insert_str(0, &banner);
        }
    }

    if !redactions.is_empty() {
        info!("Compliance: {} span(s) redacted", redactions.len());
    }
    ComplianceOutcome {
        markdown: text,
        provenance,
        redactions,
    }
}

fn banner(classification: Classification) -> Option<String> {
    match classification {
        Classification::Unclassified => None,
        other => Some(format!("{BANNER_PREFIX}{}**\n\n", other.tag())),
    }
}

/// Replace every PII span outside provenance markers.
pub fn redact(text: &str) -> (String, Vec<RedactionEntry>) {
    let mut spans: Vec<(Range<usize>, PiiKind)> = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if !line.trim_start().starts_with(MARKER_PREFIX) {
            for (kind, re) in patterns() {
                for m in re.find_iter(line) {
                    let range = offset + m.start()..offset + m.end();
                    let taken = spans
                        .iter()
                        .any(|(r, _)| r.start < range.end && range.start < r.end);
                    if !taken {
                        spans.push((range, kind));
                    }
                }
            }
        }
        offset += line.len();
    }
    spans.sort_by_key(|(r, _)| r.start);

    let mut out = String::with_capacity(text.len());
    let mut entries = Vec::with_capacity(spans.len());
    let mut cursor = 0;
    for (range, kind) in spans {
        out.push_str(&text[cursor..range.start]);
        out.push_str(kind.token());
        debug!("Redacted {} at {}..{}", kind, range.start, range.end);
        entries.push(RedactionEntry {
            kind,
            start: range.start,
            end: range.end,
            replacement: kind.token().to_string(),
        });
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);
    (out, entries)
}
