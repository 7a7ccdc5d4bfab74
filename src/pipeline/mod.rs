//! Pipeline stages for document-to-Markdown conversion.
//!
//! Each submodule implements one step; [`crate::convert`] drives them in
//! order and owns the run state machine.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ detect ──▶ route ──▶ extract ──▶ markdown ──▶ postprocess ──▶ [validate] ──▶ quality ──▶ compliance
//! (copy)    (sample)   (pure)   (extractors) (render)    (repair)        (vision)       (verdict)   (redact)
//! ```
//!
//! 1. [`input`]  copy the caller's document into a private temp dir and
//!    sniff its kind
//! 2. [`detect`]  sample a few pages or paragraphs for characteristics;
//!    caller hints override field by field
//! 3. [`route`]  characteristics → ordered extractor plan
//! 4. [`extract`]  run the plan with fault isolation and a deadline; see
//!    [`extractors`] for the built-in tools
//! 5. [`markdown`]  deterministic rendering with inline provenance markers
//! 6. [`postprocess`]  structural repair before QA
//! 7. [`validate`]  optional vision cross-check of the Markdown against
//!    page images
//! 8. [`quality`]  metrics and the accept/reject verdict
//! 9. [`compliance`]  PII redaction and classification banner
//!
//! [`pdf`], [`docx`] and [`vision`] are the backend adapters shared by the
//! detector and the extractors.

pub mod compliance;
pub mod detect;
pub mod docx;
pub mod extract;
pub mod extractors;
pub mod input;
pub mod markdown;
pub mod pdf;
pub mod postprocess;
pub mod quality;
pub mod route;
pub mod validate;
pub mod vision;
