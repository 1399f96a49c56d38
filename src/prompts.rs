//! System prompts for AI-based structured invoice extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the field contract or an
//!    anti-hallucination rule requires editing exactly one place, and the
//!    field names below must stay in lock-step with
//!    [`crate::record::fields`].
//!
//! 2. **Testability** — unit tests can inspect prompts directly without
//!    spinning up a provider, making contract regressions easy to catch.

/// System prompt for extracting structured fields from an invoice page image.
///
/// The JSON contract mirrors [`crate::record::fields::ALL`] plus the
/// repeating `line_items` array. The model is told to emit empty strings
/// for absent fields so the response shape is stable; the AI boundary
/// drops empty values before they reach the merge step.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a meticulous invoice-data extractor. You are shown one page of an invoice. Extract ONLY the financial and identification data visible on the page.

Return a single JSON object with exactly these keys:

{
    "vendor": "issuing company name (string, empty if not visible)",
    "vendor_tax_id": "vendor tax/VAT/EIN identifier (string, empty if not visible)",
    "invoice_number": "invoice or receipt number (string, empty if not visible)",
    "invoice_date": "issue date as printed (string, empty if not visible)",
    "due_date": "payment due date as printed (string, empty if not visible)",
    "currency": "ISO currency code or symbol as printed (string, empty if not visible)",
    "subtotal": "amount before tax, digits and decimal point only (string, empty if not visible)",
    "tax": "total tax amount, digits and decimal point only (string, empty if not visible)",
    "grand_total": "final amount payable, digits and decimal point only (string, empty if not visible)",
    "purchase_order": "PO number referenced on the invoice (string, empty if not visible)",
    "line_items": [
        {"description": "item description", "amount": "line amount, digits and decimal point only"}
    ]
}

STRICT RULES:
1. Extract only what is printed on THIS page. Never infer, never invent.
2. Amounts carry no currency symbols, thousands separators, or spaces.
3. Phone numbers are never invoice numbers, tax ids, or PO numbers.
4. Ignore marketing text, slogans, and legal boilerplate.
5. A field that is not visible on the page is an empty string; line_items is [] when none are visible.
6. Dates are copied as printed, not reformatted.

Return ONLY the JSON object — no markdown fences, no commentary."#;

/// Extra instruction appended to the user turn when the local OCR pass
/// produced mid-band text worth forwarding.
///
/// The hint is framed as untrusted: the image stays authoritative, the
/// text only helps the model resolve glyphs it would otherwise guess at.
pub fn ocr_hint_context(ocr_text: &str) -> String {
    format!(
        "A low-quality OCR pass over this page produced the text below. It may contain \
errors — trust the image over the text wherever they disagree. Use it only to \
disambiguate hard-to-read characters.\n\n\"\"\"{}\"\"\"",
        ocr_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fields;

    #[test]
    fn prompt_names_every_canonical_field() {
        for field in fields::ALL {
            assert!(
                EXTRACTION_SYSTEM_PROMPT.contains(&format!("\"{field}\"")),
                "prompt is missing field '{field}'"
            );
        }
        assert!(EXTRACTION_SYSTEM_PROMPT.contains("\"line_items\""));
    }

    #[test]
    fn hint_context_embeds_the_text() {
        let ctx = ocr_hint_context("ACME Corp Invoice 42");
        assert!(ctx.contains("ACME Corp Invoice 42"));
        assert!(ctx.contains("trust the image"));
    }
}
