//! # pdf2invoice
//!
//! Extract structured invoice records from PDF invoices using a hybrid
//! local-OCR / vision-LLM pipeline.
//!
//! ## Why this crate?
//!
//! Office-grade invoice batches mix crisp digital PDFs with phone-scanned
//! paper in unknown layouts. Pure OCR is free but falls over on bad scans;
//! pure vision-LLM extraction reads everything but costs real money per
//! page. This crate runs the cheap local pass first, judges it with a
//! confidence gate, and escalates **only the pages that need it** — with a
//! content-addressed cache and admission control so identical pages are
//! never billed twice and the remote API is never hammered.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Render   rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Local    Tesseract pass + composite confidence score
//!  ├─ 4. Gate     accept | escalate | escalate-with-hint   (pure decision)
//!  ├─ 5. AI       cache → rate limiter → vision-LLM structured extraction
//!  └─ 6. Merge    field resolution, conflict flagging, line-item dedup
//! ```
//!
//! Every page resolves independently; one bad page never takes down its
//! siblings, and a document's record always tells you per field whether
//! the value is resolved, conflicting, or absent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2invoice::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract("invoice.pdf", &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.record)?);
//!     eprintln!(
//!         "{} pages, {} AI calls, {} from cache",
//!         output.stats.total_pages, output.stats.ai_calls, output.stats.cached_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`       | on  | Enables the `pdf2invoice` binary (clap + anyhow + tracing-subscriber) |
//! | `tesseract` | off | Bundled Tesseract local extractor via `leptess` |
//!
//! Without `tesseract` (and without an injected [`OcrEngine`]), every page
//! escalates to the AI extractor — correct, just more expensive.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod limiter;
pub mod merge;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheStats, ExtractionCache};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ExtractError, PageError};
pub use extract::{extract, extract_batch, extract_from_bytes, extract_sync, inspect};
pub use limiter::{AiPermit, AiRateLimiter};
pub use merge::merge_pages;
pub use pipeline::ai::{AiResponse, LlmVisionExtractor, RemoteError, RemoteErrorKind, VisionExtractor};
pub use pipeline::gate::GateDecision;
pub use pipeline::ocr::{OcrEngine, OcrFault, OcrText};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{
    AttemptStatus, DocumentMetadata, DocumentStatus, ExtractionAttempt, ExtractionOutput,
    ExtractionSource, ExtractionStats, FieldCandidate, FieldConflict, FieldProvenance,
    Fingerprint, InvoiceRecord, LineItem, PageOutcome,
};
pub use stream::{extract_stream, PageOutcomeStream};
