//! Prompts for the vision OCR extractor and the vision cross-check.
//!
//! The OCR extractor splits the model's answer back into blocks (headings,
//! lists, pipe-tables, `$$` equations, paragraphs), so the prompt pins the
//! output to exactly those constructs. The cross-check parses a single JSON
//! object, so its prompt spells out the schema.

/// System prompt sent with every scanned page image.
pub const OCR_SYSTEM_PROMPT: &str = r#"You transcribe one scanned document page into Markdown.

Follow these rules precisely:

1. TEXT
   - Transcribe ALL visible text, in human reading order
   - Never invent, summarise or complete text you cannot read
   - Write [illegible] for any word you cannot read

2. STRUCTURE
   - Use # to #### for headings, following the page's visual hierarchy
   - Use - for unordered list items and 1. for ordered ones
   - Separate every paragraph, list, table and formula by one blank line

3. TABLES
   - Use GFM pipe tables: first row is the header, followed by | --- | separator
   - One table row per line, same number of cells in every row

4. FORMULAS
   - Put each displayed formula on its own lines, wrapped in $$ and $$, in LaTeX

5. WHAT TO IGNORE
   - Page numbers, running headers and footers, decorative lines

6. OUTPUT FORMAT
   - Output ONLY the Markdown content
   - Do NOT wrap it in ```markdown fences
   - Do NOT add commentary"#;

/// User message accompanying the page image.
pub fn ocr_page_instruction(page_num: u32, total_pages: u32) -> String {
    format!("Transcribe page {page_num} of {total_pages}.")
}

/// System prompt for comparing extracted Markdown against page images.
pub const VALIDATION_SYSTEM_PROMPT: &str = r#"You check document extraction quality.

You receive images of the first pages of a document and the Markdown that
was extracted from the whole document. Judge only what the images show.

Answer with ONE JSON object and nothing else:

{
  "confidence_score": <0-1, overall confidence the extraction is faithful>,
  "content_completeness": <0-1, share of visible text present in the Markdown>,
  "formatting_accuracy": <0-1, headings, lists and reading order preserved>,
  "table_accuracy": <0-1, table structure and cell values preserved>,
  "image_caption_accuracy": <0-1, figure captions preserved>,
  "issues": [
    {
      "page": <1-based page number>,
      "element_type": <"paragraph"|"heading"|"list"|"table"|"image"|"equation">,
      "description": <what is missing or garbled, quoting the page>,
      "severity": <"low"|"medium"|"high">
    }
  ],
  "suggestions": [<short improvement hints>]
}

Severity guide:
- low: cosmetic formatting differences
- medium: some content missing or misformatted
- high: significant content missing or wrong

Report text that is visible but absent from the Markdown, and text in the
Markdown that is garbled compared with the page. Do not report content from
pages you were not shown."#;

/// User message accompanying the page images.
pub fn validation_instruction(markdown: &str, pages_shown: usize) -> String {
    format!(
        "Pages shown: {pages_shown}. Extracted Markdown follows between the markers.\n\
         <<<MARKDOWN\n{markdown}\nMARKDOWN>>>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_requests_block_constructs_the_splitter_understands() {
        assert!(OCR_SYSTEM_PROMPT.contains("$$"));
        assert!(OCR_SYSTEM_PROMPT.contains("| --- |"));
        assert!(OCR_SYSTEM_PROMPT.contains("Do NOT wrap"));
    }

    #[test]
    fn validation_prompt_names_every_parsed_field() {
        for field in [
            "confidence_score",
            "content_completeness",
            "formatting_accuracy",
            "table_accuracy",
            "image_caption_accuracy",
            "issues",
        ] {
            assert!(VALIDATION_SYSTEM_PROMPT.contains(field), "{field}");
        }
        let msg = validation_instruction("# Title", 2);
        assert!(msg.starts_with("Pages shown: 2."));
        assert!(msg.contains("<<<MARKDOWN\n# Title\nMARKDOWN>>>"));
    }

    #[test]
    fn page_instruction_is_one_indexed() {
        assert_eq!(ocr_page_instruction(2, 5), "Transcribe page 2 of 5.");
    }
}
