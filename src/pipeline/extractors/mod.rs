//! Built-in extractors.
//!
//! | Id           | Name           | Backend                    | Confidence |
//! |--------------|----------------|----------------------------|------------|
//! | `NativeText` | `pdfium-text`  | pdfium text layer          | 0.95       |
//! | `Table`      | `pdfium-table` | pdfium layout (columns)    | 0.75       |
//! | `Math`       | `pdfium-math`  | pdfium layout (glyphs)     | 0.6        |
//! | `Ocr`        | `vision-ocr`   | pdfium raster + vision LLM | 0.85       |
//! | `WordText`   | `docx-text`    | zip + quick-xml            | 1.0        |
//! | `WordTable`  | `docx-table`   | zip + quick-xml            | 1.0        |
//! | `WordImage`  | `docx-image`   | zip + quick-xml            | 1.0        |
//!
//! pdfium calls run inside `spawn_blocking`; see [`crate::pipeline::pdf`].

pub mod math;
pub mod native;
pub mod ocr;
pub mod table;
pub mod word;

pub use math::MathExtractor;
pub use native::NativeTextExtractor;
pub use ocr::OcrExtractor;
pub use table::TableExtractor;
pub use word::{WordImageExtractor, WordTableExtractor, WordTextExtractor};

use crate::error::ElementError;
use crate::model::DocumentKind;
use crate::pipeline::input::SourceDocument;
use crate::pipeline::pdf::{self, PageLayout, PdfBackendError};
use std::path::PathBuf;

/// Page layouts of the whole document, read off the async runtime.
pub(crate) async fn load_layouts(
    tool: &str,
    document: &SourceDocument,
    library_dir: Option<PathBuf>,
) -> Result<Vec<Result<PageLayout, PdfBackendError>>, ElementError> {
    if document.kind() != DocumentKind::Pdf {
        return Err(ElementError::Unsupported {
            extractor: tool.to_string(),
            reason: format!("expected a PDF, got {}", document.kind()),
        });
    }
    let path = document.path().to_path_buf();
    tokio::task::spawn_blocking(move || pdf::read_layouts(&path, library_dir.as_deref(), None))
        .await
        .map_err(|e| ElementError::backend(tool, format!("layout task panicked: {e}")))?
        .map_err(|e| ElementError::backend(tool, e.to_string()))
}
