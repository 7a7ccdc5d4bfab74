//! Math-glyph lines → LaTeX display equations.
//!
//! A line is an equation when it carries at least two math or Greek glyphs,
//! or one such glyph next to an `=`. Glyphs map to LaTeX commands; the rest
//! of the line is kept verbatim. The same glyph table drives the detector's
//! `math_signal_strength` and the QA check for well-formed LaTeX.

use super::load_layouts;
use crate::error::ElementError;
use crate::model::{ElementContent, ElementType, ExtractedElement};
use crate::pipeline::extract::{ExtractionContext, Extractor, ExtractorFuture};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::pdf::{PageLayout, PdfBackendError, PDFIUM_RENDER_VERSION};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

const NAME: &str = "pdfium-math";
const CONFIDENCE: f32 = 0.6;

/// Operators counted by the detector as math signal.
pub const MATH_GLYPHS: [char; 15] = [
    '∑', '∫', '∏', '√', '∞', '±', '≤', '≥', '≠', '≈', '→', '←', '↔', '∂', '∇',
];

/// Glyph → LaTeX command (without the backslash).
const LATEX: &[(char, &str)] = &[
    ('∑', "sum"),
    ('∫', "int"),
    ('∏', "prod"),
    ('√', "sqrt"),
    ('∞', "infty"),
    ('±', "pm"),
    ('≤', "leq"),
    ('≥', "geq"),
    ('≠', "neq"),
    ('≈', "approx"),
    ('→', "rightarrow"),
    ('←', "leftarrow"),
    ('↔', "leftrightarrow"),
    ('∂', "partial"),
    ('∇', "nabla"),
    ('×', "times"),
    ('÷', "div"),
    ('·', "cdot"),
    ('∈', "in"),
    ('∉', "notin"),
    ('⊂', "subset"),
    ('∪', "cup"),
    ('∩', "cap"),
    ('∀', "forall"),
    ('∃', "exists"),
    ('α', "alpha"),
    ('β', "beta"),
    ('γ', "gamma"),
    ('δ', "delta"),
    ('ε', "epsilon"),
    ('θ', "theta"),
    ('λ', "lambda"),
    ('μ', "mu"),
    ('π', "pi"),
    ('ρ', "rho"),
    ('σ', "sigma"),
    ('τ', "tau"),
    ('φ', "phi"),
    ('ω', "omega"),
    ('Δ', "Delta"),
    ('Σ', "Sigma"),
    ('Ω', "Omega"),
];

/// Commands accepted by [`is_well_formed`] beyond the glyph table.
const EXTRA_COMMANDS: &[&str] = &[
    "frac", "left", "right", "mathrm", "mathbf", "text", "cdots", "ldots", "quad", "hat",
    "bar", "vec", "log", "ln", "exp", "sin", "cos", "tan", "lim", "max", "min", "over",
    "begin", "end", "mathbb", "operatorname", "langle", "rangle", "prime", "to",
];

pub struct MathExtractor {
    library_dir: Option<PathBuf>,
}

impl MathExtractor {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }
}

impl Extractor for MathExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        PDFIUM_RENDER_VERSION
    }

    fn extract<'a>(
        &'a self,
        document: Arc<SourceDocument>,
        _context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a> {
        Box::pin(async move {
            let layouts = load_layouts(NAME, &document, self.library_dir.clone()).await?;
            Ok(layouts
                .into_iter()
                .flat_map(|layout| match layout {
                    Ok(layout) => page_equations(&layout).into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(PdfBackendError::Page { page, detail }) => {
                        vec![Err(ElementError::failed(NAME, page, ElementType::Equation, detail))]
                    }
                    Err(e) => vec![Err(ElementError::backend(NAME, e.to_string()))],
                })
                .collect())
        })
    }
}

fn latex_command(c: char) -> Option<&'static str> {
    LATEX.iter().find(|(g, _)| *g == c).map(|(_, cmd)| *cmd)
}

/// True when the line reads as a displayed formula.
pub fn is_equation_line(text: &str) -> bool {
    let glyphs = text.chars().filter(|c| latex_command(*c).is_some()).count();
    glyphs >= 2 || (glyphs == 1 && text.contains('='))
}

/// Number of distinct [`MATH_GLYPHS`] in `text`.
pub fn distinct_math_glyphs(text: &str) -> u32 {
    text.chars()
        .filter(|c| MATH_GLYPHS.contains(c))
        .collect::<HashSet<_>>()
        .len() as u32
}

/// Replace math glyphs with LaTeX commands.
pub fn to_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.trim().chars().peekable();
    while let Some(c) = chars.next() {
        match latex_command(c) {
            Some(cmd) => {
                out.push('\\');
                out.push_str(cmd);
                if chars.peek().is_some_and(|n| n.is_alphanumeric()) {
                    out.push(' ');
                }
            }
            None => out.push(c),
        }
    }
    out
}

/// Balanced braces and `\left`/`\right`, and only known commands.
pub fn is_well_formed(latex: &str) -> bool {
    let mut depth: i32 = 0;
    for c in latex.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return false;
    }

    let mut lefts = 0usize;
    let mut rights = 0usize;
    let mut rest = latex;
    while let Some(pos) = rest.find('\\') {
        let after = &rest[pos + 1..];
        let name: String = after.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        if name.is_empty() {
            // `\\`, `\{`, `\,` and friends
            rest = after.get(1..).unwrap_or("");
            continue;
        }
        match name.as_str() {
            "left" => lefts += 1,
            "right" => rights += 1,
            _ => {}
        }
        let known =
            LATEX.iter().any(|(_, cmd)| *cmd == name) || EXTRA_COMMANDS.contains(&name.as_str());
        if !known {
            return false;
        }
        rest = &after[name.len()..];
    }
    lefts == rights
}

/// Equations found on one page, one per qualifying line.
pub fn page_equations(layout: &PageLayout) -> Vec<ExtractedElement> {
    layout
        .lines
        .iter()
        .filter(|l| is_equation_line(&l.plain()))
        .map(|l| {
            ExtractedElement::new(
                layout.page,
                l.bbox,
                CONFIDENCE,
                ElementContent::Equation(to_latex(&l.plain())),
            )
        })
        .collect()
}
