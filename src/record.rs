//! Output and intermediate types: extraction attempts, merged invoice
//! records, per-page outcomes, document metadata, and run statistics.
//!
//! Everything here is `Serialize`/`Deserialize` so records can be written
//! to disk, returned over an HTTP boundary, or diffed between runs without
//! any extra glue. The types are deliberately dumb data — all behaviour
//! that combines them lives in [`crate::merge`].

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Fingerprint ──────────────────────────────────────────────────────────

/// Deterministic digest of a page's pixel content.
///
/// Computed as the blake3 hash of the page's encoded PNG bytes: identical
/// pixel content encodes to identical PNG bytes (fixed encoder settings),
/// so identical pixels always yield an identical fingerprint. Used as the
/// cache key and as the dedup key across retries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// Fingerprint raw page bytes (normally the encoded PNG).
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Fingerprint(*blake3::hash(bytes).as_bytes())
    }

    /// Lowercase hex form, for logs and durable cache keys.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to identify a page in logs.
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

// ── Extraction attempts ──────────────────────────────────────────────────

/// Which extractor produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionSource {
    /// Fast local OCR pass (Tesseract or an injected engine).
    Local,
    /// Remote vision-LLM structured extraction.
    Ai,
}

impl fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionSource::Local => write!(f, "local"),
            ExtractionSource::Ai => write!(f, "ai"),
        }
    }
}

/// Outcome class of one extractor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Usable structured fields were produced.
    Ok,
    /// The extractor ran but its output is not trustworthy on its own.
    LowConfidence,
    /// I/O-level fault: engine unavailable, corrupted image, remote error.
    Failed,
}

/// One line item on an invoice.
///
/// `amount` is kept as the normalized decimal string produced by
/// [`crate::pipeline::parse::normalize_amount`] so exact-duplicate
/// detection across pages does not depend on float formatting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub amount: String,
    /// 1-based page the item was read from.
    pub page: usize,
    pub source: ExtractionSource,
}

/// Result of one extractor invocation over one page. Immutable once
/// created; consumed by the confidence gate and the merge step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub source: ExtractionSource,
    pub status: AttemptStatus,
    /// Normalized single-value fields (vendor, invoice_number, …).
    /// Keys are unique by construction of the map.
    pub fields: BTreeMap<String, String>,
    pub line_items: Vec<LineItem>,
    /// 0.0–1.0. Only meaningful for `source == Local`; AI attempts carry 1.0.
    pub confidence: f32,
    /// Raw recognized text, kept for the escalation hint and for audits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    /// Present iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionAttempt {
    /// A failed attempt carrying only the error detail.
    pub fn failed(source: ExtractionSource, detail: impl Into<String>) -> Self {
        ExtractionAttempt {
            source,
            status: AttemptStatus::Failed,
            fields: BTreeMap::new(),
            line_items: Vec::new(),
            confidence: 0.0,
            raw_text: None,
            error: Some(detail.into()),
        }
    }
}

// ── Canonical field names ────────────────────────────────────────────────

/// Normalized names of the single-value fields both extractors emit.
///
/// The AI prompt and the local parser both target exactly this set, so the
/// merge step never has to translate between vocabularies. Unknown keys
/// returned by the AI service are dropped at the AI boundary.
pub mod fields {
    pub const VENDOR: &str = "vendor";
    pub const VENDOR_TAX_ID: &str = "vendor_tax_id";
    pub const INVOICE_NUMBER: &str = "invoice_number";
    pub const INVOICE_DATE: &str = "invoice_date";
    pub const DUE_DATE: &str = "due_date";
    pub const CURRENCY: &str = "currency";
    pub const SUBTOTAL: &str = "subtotal";
    pub const TAX: &str = "tax";
    pub const GRAND_TOTAL: &str = "grand_total";
    pub const PURCHASE_ORDER: &str = "purchase_order";

    /// All known single-value field names.
    pub const ALL: &[&str] = &[
        VENDOR,
        VENDOR_TAX_ID,
        INVOICE_NUMBER,
        INVOICE_DATE,
        DUE_DATE,
        CURRENCY,
        SUBTOTAL,
        TAX,
        GRAND_TOTAL,
        PURCHASE_ORDER,
    ];

    /// Fields whose values are monetary amounts (normalized as decimals).
    pub const AMOUNTS: &[&str] = &[SUBTOTAL, TAX, GRAND_TOTAL];
}

// ── Merged record ────────────────────────────────────────────────────────

/// Where one resolved field value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub field: String,
    /// 1-based page.
    pub page: usize,
    pub source: ExtractionSource,
}

/// One candidate value for a conflicting field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub value: String,
    pub page: usize,
    pub source: ExtractionSource,
    pub confidence: f32,
}

/// A single-value field reported with two or more distinct non-empty
/// values across pages. Recorded, never silently resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub candidates: Vec<FieldCandidate>,
}

/// Document-level outcome class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Every page resolved.
    Complete,
    /// At least one page resolved and at least one failed.
    Partial,
    /// Every page failed; the record carries no resolved fields.
    Failed,
}

/// The merged output for one document.
///
/// Invariant: every key in `resolved` names exactly one value. Fields with
/// conflicting candidates appear in `conflicts` instead — they are recorded,
/// not silently dropped, and never duplicated into `resolved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub resolved: BTreeMap<String, String>,
    pub conflicts: Vec<FieldConflict>,
    /// Page order preserved, exact adjacent-page duplicates removed.
    pub line_items: Vec<LineItem>,
    /// One entry per resolved field, ordered by field name.
    pub provenance: Vec<FieldProvenance>,
    pub status: DocumentStatus,
    /// Human-readable reason, present iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl InvoiceRecord {
    /// True when the given field resolved to a single value.
    pub fn is_resolved(&self, field: &str) -> bool {
        self.resolved.contains_key(field)
    }

    /// True when the given field was reported with conflicting values.
    pub fn is_conflicting(&self, field: &str) -> bool {
        self.conflicts.iter().any(|c| c.field == field)
    }
}

// ── Per-page outcome ─────────────────────────────────────────────────────

/// What the page pipeline resolved a single page to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-based page number.
    pub page_num: usize,
    /// The attempt the page resolved from; `None` iff `error` is set.
    pub attempt: Option<ExtractionAttempt>,
    /// Gate decision taken for this page, when the local pass ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<crate::pipeline::gate::GateDecision>,
    /// True when the attempt was served from the extraction cache.
    pub from_cache: bool,
    /// AI retries spent on this page.
    pub retries: u8,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

impl PageOutcome {
    /// True when the page produced a usable attempt.
    pub fn is_resolved(&self) -> bool {
        self.error.is_none() && self.attempt.is_some()
    }

    /// A failed outcome carrying a page error.
    pub fn failed(page_num: usize, error: PageError, duration_ms: u64) -> Self {
        PageOutcome {
            page_num,
            attempt: None,
            decision: None,
            from_cache: false,
            retries: 0,
            duration_ms,
            error: Some(error),
        }
    }
}

// ── Metadata & stats ─────────────────────────────────────────────────────

/// PDF document metadata, extracted without any OCR or AI call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Counters for one document extraction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    pub resolved_pages: usize,
    pub failed_pages: usize,
    /// Pages resolved from the local OCR pass alone.
    pub local_pages: usize,
    /// Pages resolved through the AI extractor (cache misses).
    pub ai_pages: usize,
    /// Pages served from the extraction cache.
    pub cached_pages: usize,
    /// AI calls actually issued (excludes cache hits and coalesced waits).
    pub ai_calls: usize,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub extract_duration_ms: u64,
}

/// Everything `extract` returns for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub record: InvoiceRecord,
    /// Per-page outcomes, sorted by page number.
    pub pages: Vec<PageOutcome>,
    pub metadata: DocumentMetadata,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// Treat an all-pages-failed document as an error.
    ///
    /// The extraction API itself never fails for page-level reasons —
    /// callers that want "any record or an error" semantics convert here.
    pub fn into_result(self) -> Result<Self, crate::error::ExtractError> {
        if self.record.status == DocumentStatus::Failed {
            Err(crate::error::ExtractError::AllPagesFailed {
                total: self.pages.len(),
                first_error: self
                    .record
                    .failure
                    .clone()
                    .unwrap_or_else(|| "all pages failed".to_string()),
            })
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::of_bytes(b"same pixels");
        let b = Fingerprint::of_bytes(b"same pixels");
        let c = Fingerprint::of_bytes(b"other pixels");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_hex_is_64_chars() {
        let fp = Fingerprint::of_bytes(b"x");
        assert_eq!(fp.to_hex().len(), 64);
        assert_eq!(format!("{fp}").len(), 12);
    }

    #[test]
    fn source_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ExtractionSource::Ai).unwrap(),
            "\"ai\""
        );
        assert_eq!(
            serde_json::to_string(&AttemptStatus::LowConfidence).unwrap(),
            "\"low_confidence\""
        );
    }

    #[test]
    fn failed_attempt_carries_detail() {
        let a = ExtractionAttempt::failed(ExtractionSource::Ai, "quota exhausted");
        assert_eq!(a.status, AttemptStatus::Failed);
        assert_eq!(a.error.as_deref(), Some("quota exhausted"));
        assert!(a.fields.is_empty());
    }
}
