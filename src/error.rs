//! Error types for the pdf2invoice library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the document cannot be processed at all
//!   (bad input file, corrupt PDF, provider not configured). Returned as
//!   `Err(ExtractError)` from the top-level `extract*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (render glitch,
//!   AI call exhausted its retries, admission-control timeout) but all other
//!   pages are fine. Stored inside [`crate::record::PageOutcome`] so callers
//!   can inspect partial success rather than losing the whole invoice to one
//!   bad page.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! page failure, log and continue, or collect all failures for a post-run
//! report. A failed document inside a batch never aborts sibling documents —
//! [`crate::extract_batch`] returns one `Result` per input.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2invoice library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::record::PageOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// Input exceeds the configured size cap.
    #[error("PDF is too large: {size} bytes (limit {limit})\nRaise max_input_bytes if this is intentional.")]
    InputTooLarge { size: u64, limit: u64 },

    /// Document has more pages than the configured cap.
    #[error("PDF has too many pages: {pages} (limit {limit})\nRaise max_pages if this is intentional.")]
    TooManyPages { pages: usize, limit: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured AI provider is not initialised (missing API key etc.).
    #[error("AI provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every page failed; there is no partial record worth returning.
    ///
    /// The `extract*` functions themselves report this situation through
    /// the record's `failed` status rather than an `Err`; this variant is
    /// produced by [`crate::record::ExtractionOutput::into_result`] for
    /// callers that want error semantics.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium or set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::record::PageOutcome`] when a page fails. The overall
/// extraction continues unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The local OCR engine faulted on this page and the AI path also failed.
    ///
    /// An OCR fault alone never surfaces here — it always escalates to the
    /// AI extractor first.
    #[error("Page {page}: local OCR failed ({ocr_detail}), escalation failed: {ai_detail}")]
    OcrFailed {
        page: usize,
        ocr_detail: String,
        ai_detail: String,
    },

    /// AI extraction failed after all retries.
    #[error("Page {page}: AI extraction failed after {retries} retries: {detail}")]
    AiFailed {
        page: usize,
        retries: u8,
        detail: String,
    },

    /// Local admission control gave up waiting for an AI-call slot.
    #[error("Page {page}: timed out after {secs}s waiting for an AI-call slot")]
    RateLimitTimeout { page: usize, secs: u64 },

    /// The document-level deadline elapsed before this page finished.
    #[error("Page {page}: cancelled by the document timeout")]
    Cancelled { page: usize },
}

impl PageError {
    /// 1-based page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::OcrFailed { page, .. }
            | PageError::AiFailed { page, .. }
            | PageError::RateLimitTimeout { page, .. }
            | PageError::Cancelled { page } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_pages_failed_display() {
        let e = ExtractError::AllPagesFailed {
            total: 4,
            first_error: "render glitch".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("4 pages"), "got: {msg}");
        assert!(msg.contains("render glitch"));
    }

    #[test]
    fn rate_limit_timeout_display() {
        let e = PageError::RateLimitTimeout { page: 2, secs: 30 };
        assert!(e.to_string().contains("30s"));
        assert!(e.to_string().contains("Page 2"));
    }

    #[test]
    fn ai_failed_display() {
        let e = PageError::AiFailed {
            page: 7,
            retries: 3,
            detail: "HTTP 503".into(),
        };
        assert!(e.to_string().contains("3 retries"));
        assert!(e.to_string().contains("HTTP 503"));
    }

    #[test]
    fn page_error_reports_its_page() {
        assert_eq!(PageError::Cancelled { page: 5 }.page(), 5);
        assert_eq!(
            PageError::RenderFailed {
                page: 1,
                detail: "x".into()
            }
            .page(),
            1
        );
    }

    #[test]
    fn page_error_round_trips_through_serde() {
        let e = PageError::Cancelled { page: 5 };
        let json = serde_json::to_string(&e).unwrap();
        let back: PageError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, PageError::Cancelled { page: 5 }));
    }
}
