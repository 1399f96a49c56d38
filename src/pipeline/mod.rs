//! Pipeline stages for PDF-to-invoice extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different OCR engine) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ ocr ──▶ gate ──▶ (cache | ai) ──▶ page outcome
//! (URL/path) (pdfium)  (png+fp)  (local)  (decide)   (escalation)
//! ```
//!
//! 1. [`input`]  — canonicalise the user-supplied path or URL to a local file
//! 2. [`render`] — rasterise pages; runs in `spawn_blocking` because pdfium
//!    is not async-safe
//! 3. [`encode`] — PNG-encode each page and compute its fingerprint
//! 4. [`ocr`]    — fast local text-recognition pass plus confidence scoring
//! 5. [`gate`]   — pure decision: accept / escalate / escalate-with-hint
//! 6. [`parse`]  — turn accepted OCR text into structured invoice fields
//! 7. [`ai`]     — drive the vision-LLM call with admission control and
//!    retry/backoff; the only stage with network I/O
//! 8. [`page`]   — the per-page state machine tying the stages together

pub mod ai;
pub mod encode;
pub mod gate;
pub mod input;
pub mod ocr;
pub mod page;
pub mod parse;
pub mod render;
