//! Prompt text for the vision backends and the LLM auditor.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — tuning the OCR instructions, the figure
//!    taxonomy, or the audit rubric means editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without
//!    talking to a real backend, so prompt regressions are easy to catch.

/// System prompt for page-level OCR via a vision model.
///
/// Every vision adapter (local Ollama and cloud providers) uses the same
/// instructions so engine output is comparable across the cascade.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are an expert OCR engine. Extract ALL text from this page image.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Extract every piece of text completely and accurately
   - Maintain the reading order as a human would read the page
   - Do NOT paraphrase, summarise, or invent text

2. STRUCTURE
   - Preserve paragraph breaks
   - Preserve headings on their own lines
   - Preserve list items, one per line
   - Convert tables to plain rows with cells separated by ' | '

3. OUTPUT FORMAT
   - Output ONLY the extracted text
   - Do NOT wrap the output in fences
   - Do NOT add commentary, confidence notes, or page markers
   - If the page contains no text, output nothing"#;

/// Prompt for describing one cropped figure region.
///
/// The placeholder is filled by [`figure_prompt`]; adapters must not send
/// this constant raw.
const FIGURE_PROMPT_TEMPLATE: &str = r#"You are analysing a figure cropped from a document page. Nearby page text is provided for context.

<page_context>
{context}
</page_context>

Classify the figure as one of: chart, table, diagram, photo, map, equation.
Then describe its content in 2-4 sentences, including any axis labels,
legends, or data trends that are readable.

Respond in JSON format:
{
    "type": "chart" | "table" | "diagram" | "photo" | "map" | "equation",
    "description": "what the figure shows"
}

Only respond with valid JSON, no other text."#;

/// Build the figure-description prompt with the surrounding page text
/// spliced in. `context` should already be truncated by the caller.
pub fn figure_prompt(context: &str) -> String {
    FIGURE_PROMPT_TEMPLATE.replace("{context}", context)
}

/// Prompt for the text-only LLM quality auditor.
///
/// The placeholder is filled by [`audit_prompt`]. The auditor is asked for
/// strict JSON; the parser in [`crate::audit::llm`] tolerates violations.
const AUDIT_PROMPT_TEMPLATE: &str = r#"You are an OCR quality auditor. Analyze this extracted text and determine if it's acceptable quality.

<extracted_text>
{text}
</extracted_text>

Evaluate based on:
1. Readability: Can humans understand the text?
2. Completeness: Does it seem like a complete extraction (no obvious missing parts)?
3. Accuracy: Are there obvious OCR errors (garbled text, wrong characters)?
4. Structure: Is the structure preserved (headers, paragraphs, lists)?

Respond in JSON format:
{
    "verdict": "acceptable" | "needs_review" | "poor",
    "confidence": 0.0-1.0,
    "issues": ["list of specific issues found"],
    "reasoning": "brief explanation of your verdict"
}

Only respond with valid JSON, no other text."#;

/// Truncation marker appended when audit input exceeds the size cap.
pub const AUDIT_TRUNCATION_MARKER: &str = "\n\n[... truncated for audit ...]";

/// Build the audit prompt, truncating `text` to `max_chars` on a char
/// boundary so long pages don't blow the auditor's context window.
pub fn audit_prompt(text: &str, max_chars: usize) -> String {
    let truncated: String;
    let body = if text.chars().count() > max_chars {
        truncated = text.chars().take(max_chars).collect::<String>() + AUDIT_TRUNCATION_MARKER;
        &truncated
    } else {
        text
    };
    AUDIT_PROMPT_TEMPLATE.replace("{text}", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_prompt_demands_raw_output() {
        assert!(OCR_SYSTEM_PROMPT.contains("Output ONLY the extracted text"));
        assert!(!OCR_SYSTEM_PROMPT.contains("{"));
    }

    #[test]
    fn figure_prompt_splices_context() {
        let p = figure_prompt("Revenue grew 40% in Q3.");
        assert!(p.contains("<page_context>\nRevenue grew 40% in Q3.\n</page_context>"));
        assert!(p.contains("\"type\""));
        assert!(!p.contains("{context}"));
    }

    #[test]
    fn audit_prompt_truncates_long_text() {
        let long = "x".repeat(10_000);
        let p = audit_prompt(&long, 4_000);
        assert!(p.contains(AUDIT_TRUNCATION_MARKER));
        assert!(p.len() < 6_000);
    }

    #[test]
    fn audit_prompt_leaves_short_text_alone() {
        let p = audit_prompt("clean short page", 4_000);
        assert!(p.contains("clean short page"));
        assert!(!p.contains(AUDIT_TRUNCATION_MARKER));
    }
}
