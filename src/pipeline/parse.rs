//! Turn raw OCR text into structured invoice fields.
//!
//! Runs only on pages the confidence gate accepted — a cheap, label-driven
//! pass over the recognized lines. It is deliberately conservative: a field
//! it cannot anchor to a label is left absent for the merge step to report,
//! rather than guessed at. Amounts and comparison keys are normalized here
//! so the merge step compares values, not formatting.
//!
//! The normalizers double as the merge step's comparison functions: both
//! extractors' outputs pass through the same ones, so "1,234.56" from OCR
//! and "1234.56" from the AI service are the same value downstream.

use crate::record::{fields, ExtractionSource, LineItem};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Lowercase, whitespace-collapsed comparison form of arbitrary text.
pub fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a monetary amount to a canonical decimal string.
///
/// Handles both separator conventions ("1,234.56" and "1.234,56"), strips
/// currency symbols and spaces, and pads single-digit cents. A separator
/// followed by exactly one or two digits at the end is the decimal point;
/// everything else is a thousands separator. Returns `None` when the input
/// carries no digits at all.
pub fn normalize_amount(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_sep = cleaned.rfind(|c| c == '.' || c == ',');
    let (int_digits, frac) = match last_sep {
        Some(pos) => {
            let after: String = cleaned[pos + 1..]
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            if (1..=2).contains(&after.len()) {
                let before: String = cleaned[..pos]
                    .chars()
                    .filter(|c| c.is_ascii_digit())
                    .collect();
                (before, Some(after))
            } else {
                let all: String = cleaned.chars().filter(|c| c.is_ascii_digit()).collect();
                (all, None)
            }
        }
        None => (cleaned, None),
    };

    let trimmed = int_digits.trim_start_matches('0');
    let int_part = if trimmed.is_empty() { "0" } else { trimmed };

    Some(match frac {
        Some(f) if f.len() == 1 => format!("{int_part}.{f}0"),
        Some(f) => format!("{int_part}.{f}"),
        None => int_part.to_string(),
    })
}

/// Comparison form of a field value: amounts by numeric identity,
/// everything else by [`normalize_text`].
pub fn normalize_field_value(field: &str, value: &str) -> String {
    if fields::AMOUNTS.contains(&field) {
        if let Some(amount) = normalize_amount(value) {
            return amount;
        }
    }
    normalize_text(value)
}

// ── Label regexes ────────────────────────────────────────────────────────

const DATE: &str = r"\d{1,2}[./-]\d{1,2}[./-]\d{2,4}|\d{4}-\d{2}-\d{2}";
const AMOUNT: &str = r"(?:\d{1,3}(?:[.,]\d{3})*|\d+)(?:[.,]\d{1,2})?";

static RE_INVOICE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:invoice|receipt)\s*(?:no|num|number)?\.?\s*[:#]?\s*([A-Za-z]{0,5}[-/]?\d[A-Za-z0-9/-]{2,})").unwrap()
});
static RE_TAX_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:tax\s*id|vat\s*(?:no|number|reg(?:istration)?)?|ein|nit|gst\s*(?:no|number)?|abn)\b\s*\.?\s*[:#]?\s*([A-Za-z0-9][A-Za-z0-9.-]{4,})").unwrap()
});
static RE_DUE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:due\s+date|payment\s+due|due\s+by|payable\s+by|due)\b\s*[:.]?\s*({DATE})"
    ))
    .unwrap()
});
static RE_INVOICE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:invoice\s+date|date\s+of\s+issue|issue\s+date|issued\s+on|dated)\b\s*[:.]?\s*({DATE})"
    ))
    .unwrap()
});
static RE_ANY_DATE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)\bdate\b\s*[:.]?\s*({DATE})")).unwrap());
static RE_GRAND_TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:grand\s+total|total\s+(?:amount\s+)?due|amount\s+due|balance\s+due|total\s+to\s+pay|amount\s+payable|total)\b\s*[:.]?\s*(?:[$€£]|USD|EUR|GBP)?\s*({AMOUNT})\s*$"
    ))
    .unwrap()
});
static RE_SUBTOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\bsub\s*-?\s*total\b\s*[:.]?\s*(?:[$€£])?\s*({AMOUNT})\s*$"
    ))
    .unwrap()
});
static RE_TAX_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:sales\s+tax|tax|vat|iva|gst)\b\s*(?:\([^)]{{0,12}}\))?\s*[:.]?\s*(?:[$€£])?\s*({AMOUNT})\s*$"
    ))
    .unwrap()
});
static RE_PURCHASE_ORDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:p\.?\s?o\.?|purchase\s+order)\s*(?:no|num|number)?\.?\s*[:#]?\s*([A-Za-z]{0,4}-?\d[A-Za-z0-9/-]{2,})").unwrap()
});
static RE_VENDOR_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|vendor|seller|supplier|sold\s+by|remit\s+to)\s*[:.]\s*(\S.{2,99})")
        .unwrap()
});
static RE_CURRENCY_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(USD|EUR|GBP|CAD|AUD|CHF|MXN|COP|JPY|CNY)\b").unwrap());
static RE_LINE_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\S(?:.{0,78}?\S)?)\s{2,}[$€£]?\s*((?:\d{1,3}(?:[.,]\d{3})*|\d+)[.,]\d{2})\s*$")
        .unwrap()
});
static RE_HAS_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-zÀ-ÿ]{3,}").unwrap());

/// Extract structured fields and line items from recognized page text.
///
/// `page` is the 1-based page number stamped on the produced line items.
pub fn parse_invoice_text(
    text: &str,
    page: usize,
) -> (BTreeMap<String, String>, Vec<LineItem>) {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    let mut items: Vec<LineItem> = Vec::new();

    let set_once = |map: &mut BTreeMap<String, String>, key: &str, value: String| {
        map.entry(key.to_string()).or_insert(value);
    };

    for line in text.lines() {
        if let Some(cap) = RE_INVOICE_NUMBER.captures(line) {
            set_once(&mut out, fields::INVOICE_NUMBER, cap[1].trim().to_string());
        }
        if let Some(cap) = RE_PURCHASE_ORDER.captures(line) {
            set_once(&mut out, fields::PURCHASE_ORDER, cap[1].trim().to_string());
        }
        if let Some(cap) = RE_DUE_DATE.captures(line) {
            set_once(&mut out, fields::DUE_DATE, cap[1].to_string());
        }
        if let Some(cap) = RE_INVOICE_DATE.captures(line) {
            set_once(&mut out, fields::INVOICE_DATE, cap[1].to_string());
        }
        if let Some(cap) = RE_VENDOR_LABEL.captures(line) {
            set_once(&mut out, fields::VENDOR, cap[1].trim().to_string());
        }
        if let Some(cap) = RE_CURRENCY_CODE.captures(line) {
            set_once(&mut out, fields::CURRENCY, cap[1].to_string());
        }

        // A tax-id line must not be mistaken for a tax amount.
        if let Some(cap) = RE_TAX_ID.captures(line) {
            set_once(&mut out, fields::VENDOR_TAX_ID, cap[1].trim().to_string());
            continue;
        }

        // Labeled amounts win over the line-item shape; totals sections sit
        // at the bottom, so later matches overwrite earlier ones.
        if let Some(cap) = RE_SUBTOTAL.captures(line) {
            if let Some(v) = normalize_amount(&cap[1]) {
                out.insert(fields::SUBTOTAL.to_string(), v);
            }
        } else if let Some(cap) = RE_GRAND_TOTAL.captures(line) {
            if let Some(v) = normalize_amount(&cap[1]) {
                out.insert(fields::GRAND_TOTAL.to_string(), v);
            }
        } else if let Some(cap) = RE_TAX_AMOUNT.captures(line) {
            if let Some(v) = normalize_amount(&cap[1]) {
                out.insert(fields::TAX.to_string(), v);
            }
        } else if let Some(cap) = RE_LINE_ITEM.captures(line) {
            let description = cap[1].trim().to_string();
            if RE_HAS_WORD.is_match(&description) {
                if let Some(amount) = normalize_amount(&cap[2]) {
                    items.push(LineItem {
                        description,
                        amount,
                        page,
                        source: ExtractionSource::Local,
                    });
                }
            }
        }
    }

    // Fallback invoice date: any bare "Date:" line that is not a due date.
    if !out.contains_key(fields::INVOICE_DATE) {
        for line in text.lines() {
            if RE_DUE_DATE.is_match(line) {
                continue;
            }
            if let Some(cap) = RE_ANY_DATE_LABEL.captures(line) {
                out.insert(fields::INVOICE_DATE.to_string(), cap[1].to_string());
                break;
            }
        }
    }

    // Fallback vendor: the first line that reads like a name rather than a
    // label or an amount.
    if !out.contains_key(fields::VENDOR) {
        if let Some(name) = text
            .lines()
            .map(str::trim)
            .find(|l| {
                RE_HAS_WORD.is_match(l)
                    && l.len() >= 4
                    && l.len() <= 80
                    && !l.to_lowercase().contains("invoice")
                    && !l.chars().any(|c| c.is_ascii_digit())
            })
        {
            out.insert(fields::VENDOR.to_string(), name.to_string());
        }
    }

    (out, items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ACME Office Supplies Ltd\n\
        Invoice Number: INV-2024-0042\n\
        Invoice Date: 12/03/2024  Due Date: 11/04/2024\n\
        VAT Reg: GB123456789\n\
        PO Number: PO-7781\n\
        Description                      Amount\n\
        Paper A4 500 sheets              12.50\n\
        Toner cartridge black            89.00\n\
        Delivery                          5.00\n\
        Subtotal                        106.50\n\
        Tax (19%)                        20.24\n\
        Total amount due                126.74\n";

    #[test]
    fn amounts_normalize_across_conventions() {
        assert_eq!(normalize_amount("1,234.56").as_deref(), Some("1234.56"));
        assert_eq!(normalize_amount("1.234,56").as_deref(), Some("1234.56"));
        assert_eq!(normalize_amount("$ 126.74").as_deref(), Some("126.74"));
        assert_eq!(normalize_amount("1.234").as_deref(), Some("1234"));
        assert_eq!(normalize_amount("12.5").as_deref(), Some("12.50"));
        assert_eq!(normalize_amount("0,50").as_deref(), Some("0.50"));
        assert_eq!(normalize_amount("no digits"), None);
    }

    #[test]
    fn normalize_text_collapses_case_and_whitespace() {
        assert_eq!(normalize_text("  ACME   Corp \n Ltd "), "acme corp ltd");
    }

    #[test]
    fn field_values_compare_numerically_for_amounts() {
        assert_eq!(
            normalize_field_value(fields::GRAND_TOTAL, "1,234.56"),
            normalize_field_value(fields::GRAND_TOTAL, "1234.56")
        );
        assert_ne!(
            normalize_field_value(fields::VENDOR, "ACME"),
            normalize_field_value(fields::VENDOR, "ACNE")
        );
    }

    #[test]
    fn sample_invoice_parses() {
        let (fields_map, items) = parse_invoice_text(SAMPLE, 1);

        assert_eq!(fields_map[fields::INVOICE_NUMBER], "INV-2024-0042");
        assert_eq!(fields_map[fields::INVOICE_DATE], "12/03/2024");
        assert_eq!(fields_map[fields::DUE_DATE], "11/04/2024");
        assert_eq!(fields_map[fields::VENDOR_TAX_ID], "GB123456789");
        assert_eq!(fields_map[fields::PURCHASE_ORDER], "PO-7781");
        assert_eq!(fields_map[fields::SUBTOTAL], "106.50");
        assert_eq!(fields_map[fields::TAX], "20.24");
        assert_eq!(fields_map[fields::GRAND_TOTAL], "126.74");
        assert_eq!(fields_map[fields::VENDOR], "ACME Office Supplies Ltd");

        let descriptions: Vec<&str> = items.iter().map(|i| i.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec!["Paper A4 500 sheets", "Toner cartridge black", "Delivery"]
        );
        assert_eq!(items[0].amount, "12.50");
        assert!(items.iter().all(|i| i.page == 1));
    }

    #[test]
    fn totals_do_not_leak_into_line_items() {
        let (_, items) = parse_invoice_text("Subtotal      10.00\nTotal      12.00\n", 1);
        assert!(items.is_empty());
    }

    #[test]
    fn tax_id_line_is_not_a_tax_amount() {
        let (fields_map, _) = parse_invoice_text("Tax ID: 12-3456789\n", 1);
        assert_eq!(fields_map[fields::VENDOR_TAX_ID], "12-3456789");
        assert!(!fields_map.contains_key(fields::TAX));
    }

    #[test]
    fn later_total_wins() {
        let text = "Total      100.00\nsome rows\nTotal due      126.74\n";
        let (fields_map, _) = parse_invoice_text(text, 2);
        assert_eq!(fields_map[fields::GRAND_TOTAL], "126.74");
    }
}
