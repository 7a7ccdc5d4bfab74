//! Error types for the docrip library.
//!
//! Two outcome channels:
//!
//! * [`DocRipError`] is **fatal**: the run (or the caller's request) cannot
//!   proceed, e.g. unreadable input or an unwritable output directory.
//!
//! * [`ElementError`] is **non-fatal**: one extractor, or one element inside
//!   an extractor's output, failed. Never propagated with `?` past the
//!   orchestrator; each one becomes exactly one
//!   [`crate::model::ProcessingDefect`] and the run carries on.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::ElementType;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DocRipError>;

/// All fatal errors returned by the docrip library.
#[derive(Debug, Error)]
pub enum DocRipError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The document could not be opened or is structurally unusable.
    ///
    /// Raised by acquisition or detection, always before any extractor runs.
    #[error("Document '{identifier}' is unreadable: {reason}")]
    DocumentUnreadable { identifier: String, reason: String },

    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write one of the per-document artifacts.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocRipError {
    /// Shorthand for the most common fatal error.
    pub fn unreadable(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        DocRipError::DocumentUnreadable {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure is attributable to the input document rather
    /// than to the environment.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DocRipError::DocumentUnreadable { .. }
                | DocRipError::FileNotFound { .. }
                | DocRipError::PermissionDenied { .. }
        )
    }
}

/// A non-fatal failure of one extractor or one extracted element.
///
/// Page is `0` when the page concept does not apply.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementError {
    /// The extractor raised an error while producing an element.
    #[error("{extractor}: {element_type} on page {page} failed: {message}")]
    ExtractorFailed {
        extractor: String,
        page: u32,
        element_type: ElementType,
        message: String,
    },

    /// The extractor failed as a whole before producing any element.
    #[error("{extractor}: {message}")]
    Backend { extractor: String, message: String },

    /// The run deadline expired while the extractor was still working.
    #[error("{extractor}: abandoned at run deadline after {elapsed_ms}ms")]
    Timeout { extractor: String, elapsed_ms: u64 },

    /// The extractor does not support this document.
    #[error("{extractor}: unsupported input: {reason}")]
    Unsupported { extractor: String, reason: String },

    /// The route named an extractor nobody registered.
    #[error("no extractor registered for '{extractor}'")]
    MissingExtractor { extractor: String },
}

impl ElementError {
    pub fn backend(extractor: impl Into<String>, message: impl Into<String>) -> Self {
        ElementError::Backend {
            extractor: extractor.into(),
            message: message.into(),
        }
    }

    pub fn failed(
        extractor: impl Into<String>,
        page: u32,
        element_type: ElementType,
        message: impl Into<String>,
    ) -> Self {
        ElementError::ExtractorFailed {
            extractor: extractor.into(),
            page,
            element_type,
            message: message.into(),
        }
    }

    /// Page the failure relates to, `0` for whole-extractor failures.
    pub fn page(&self) -> u32 {
        match self {
            ElementError::ExtractorFailed { page, .. } => *page,
            _ => 0,
        }
    }

    /// Element type when the failure concerns a specific element.
    pub fn element_type(&self) -> Option<ElementType> {
        match self {
            ElementError::ExtractorFailed { element_type, .. } => Some(*element_type),
            _ => None,
        }
    }
}
