//! Local text recognition: the fast, free pass that runs before any AI call.
//!
//! The [`OcrEngine`] trait is the seam to the OCR boundary: the bundled
//! implementation wraps Tesseract via `leptess` (cargo feature
//! `tesseract`), and hosts can inject any engine through
//! [`crate::config::ExtractionConfigBuilder::ocr_engine`]. With neither, the
//! pipeline still works — every page escalates straight to the AI
//! extractor, and the missing engine is reported once per batch.
//!
//! Poor image quality is NOT an engine failure: a garbled page comes back
//! as text with a low score. Only I/O-level faults (engine unavailable,
//! unreadable image) produce [`OcrFault`], and even those merely escalate.
//!
//! ## Composite confidence
//!
//! Tesseract's own mean word confidence is a weak signal on invoices — it
//! is blind to *what* was read. The composite score blends the engine
//! confidence with shape checks on the recognized text: overall length,
//! invoice-keyword hits, digit density, garbage-character ratio, and the
//! share of plausible words. Deterministic for identical pixels and
//! identical configuration.

use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Raw output of one OCR pass.
#[derive(Debug, Clone)]
pub struct OcrText {
    pub text: String,
    /// Engine-reported mean word confidence, 0–100. Negative when the
    /// engine does not report one.
    pub mean_confidence: f32,
}

/// I/O-level OCR fault. Never fatal — the page escalates instead.
#[derive(Debug, Clone, Error)]
#[error("OCR engine fault: {detail}")]
pub struct OcrFault {
    pub detail: String,
}

impl OcrFault {
    pub fn new(detail: impl Into<String>) -> Self {
        OcrFault {
            detail: detail.into(),
        }
    }
}

/// A local text-recognition engine.
///
/// `recognize` is called from `spawn_blocking` — implementations may block
/// freely but must be callable from any thread.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<OcrText, OcrFault>;
}

/// Grayscale + contrast stretch before recognition.
///
/// Scanned invoices arrive with colored letterheads and washed-out toner;
/// both measurably hurt Tesseract. Kept deliberately mild — aggressive
/// binarisation destroys fine print more often than it helps.
pub fn preprocess(image: &DynamicImage) -> DynamicImage {
    image.grayscale().adjust_contrast(16.0)
}

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-zÀ-ÿ]{3,}\b").unwrap());

/// Characters that almost never appear on a real invoice but frequently
/// appear when OCR misreads texture as glyphs.
const GARBAGE_CHARS: &[char] = &['¿', '¡', '°', '•', '★', '◆', '■', '□', '▪', '▫', '\u{FFFD}'];

/// Blend the engine confidence with text-shape factors into one 0.0–1.0
/// score. Pure function; the weights below were tuned on utility-invoice
/// scans and are intentionally conservative about short output.
pub fn composite_confidence(text: &str, engine_confidence: f32, keywords: &[String]) -> f32 {
    let trimmed = text.trim();
    if trimmed.len() < 50 {
        return 0.0;
    }

    let length_factor = (trimmed.len() as f32 / 500.0).min(1.0);

    let lower = trimmed.to_lowercase();
    let keyword_factor = if keywords.is_empty() {
        1.0
    } else {
        let hits = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
        hits as f32 / keywords.len() as f32
    };

    let digit_factor = (RE_NUMBER.find_iter(trimmed).count() as f32 / 10.0).min(1.0);

    let engine_factor = if engine_confidence < 0.0 {
        0.5
    } else {
        (engine_confidence / 100.0).clamp(0.0, 1.0)
    };

    let garbage = trimmed.chars().filter(|c| GARBAGE_CHARS.contains(c)).count();
    let garbage_factor = (1.0 - garbage as f32 / 50.0).max(0.0);

    let word_factor = (RE_WORD.find_iter(trimmed).count() as f32 / 20.0).min(1.0);

    length_factor * 0.15
        + keyword_factor * 0.25
        + digit_factor * 0.15
        + engine_factor * 0.20
        + garbage_factor * 0.15
        + word_factor * 0.10
}

// ── Bundled Tesseract engine ─────────────────────────────────────────────

/// Tesseract-backed engine via `leptess`.
///
/// A fresh `LepTess` is created per call: initialisation costs milliseconds
/// against a recognition pass of hundreds, and it sidesteps sharing raw
/// Tesseract handles across threads.
#[cfg(feature = "tesseract")]
pub struct TesseractEngine {
    language: String,
}

#[cfg(feature = "tesseract")]
impl TesseractEngine {
    /// Validate that the engine and language data are usable, once.
    pub fn new(language: impl Into<String>) -> Result<Self, OcrFault> {
        let language = language.into();
        leptess::LepTess::new(None, &language)
            .map_err(|e| OcrFault::new(format!("tesseract init ({language}): {e}")))?;
        Ok(TesseractEngine { language })
    }
}

#[cfg(feature = "tesseract")]
impl OcrEngine for TesseractEngine {
    fn recognize(&self, image: &DynamicImage) -> Result<OcrText, OcrFault> {
        use std::io::Cursor;

        let prepared = preprocess(image);
        let mut buf = Vec::new();
        prepared
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| OcrFault::new(format!("image encode: {e}")))?;

        let mut tess = leptess::LepTess::new(None, &self.language)
            .map_err(|e| OcrFault::new(format!("tesseract init: {e}")))?;
        tess.set_image_from_mem(&buf)
            .map_err(|e| OcrFault::new(format!("set image: {e}")))?;

        let text = tess
            .get_utf8_text()
            .map_err(|e| OcrFault::new(format!("recognition: {e}")))?;
        let mean_confidence = tess.mean_text_conf() as f32;

        Ok(OcrText {
            text,
            mean_confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> Vec<String> {
        crate::config::ExtractionConfig::default().invoice_keywords
    }

    const CLEAN_INVOICE_TEXT: &str = "ACME Office Supplies Ltd\n\
        Invoice Number: INV-2024-0042\n\
        Invoice Date: 12/03/2024  Due Date: 11/04/2024\n\
        Bill To: Northwind Traders, 12 Harbour Road\n\
        Description                      Amount\n\
        Paper A4 500 sheets              12.50\n\
        Toner cartridge black            89.00\n\
        Delivery                          5.00\n\
        Subtotal                        106.50\n\
        Tax (19%)                        20.24\n\
        Total amount due                126.74\n\
        Payment within 30 days.";

    #[test]
    fn short_text_scores_zero() {
        assert_eq!(composite_confidence("TOTAL 12.00", 95.0, &keywords()), 0.0);
        assert_eq!(composite_confidence("", 95.0, &keywords()), 0.0);
    }

    #[test]
    fn clean_invoice_text_scores_high() {
        let score = composite_confidence(CLEAN_INVOICE_TEXT, 93.0, &keywords());
        assert!(score >= 0.80, "got {score}");
    }

    #[test]
    fn garbage_heavy_text_scores_low() {
        let garbage = "¿¡°•★◆■□▪▫".repeat(20) + "some words but mostly noise 12";
        let score = composite_confidence(&garbage, 40.0, &keywords());
        assert!(score < 0.5, "got {score}");
    }

    #[test]
    fn missing_engine_confidence_uses_neutral_factor() {
        let with_unknown = composite_confidence(CLEAN_INVOICE_TEXT, -1.0, &keywords());
        let with_half = composite_confidence(CLEAN_INVOICE_TEXT, 50.0, &keywords());
        assert!((with_unknown - with_half).abs() < 1e-6);
    }

    #[test]
    fn score_is_deterministic() {
        let a = composite_confidence(CLEAN_INVOICE_TEXT, 88.0, &keywords());
        let b = composite_confidence(CLEAN_INVOICE_TEXT, 88.0, &keywords());
        assert_eq!(a, b);
    }

    #[test]
    fn preprocess_keeps_dimensions() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            20,
            10,
            image::Rgba([200, 180, 160, 255]),
        ));
        let out = preprocess(&img);
        assert_eq!((out.width(), out.height()), (20, 10));
    }
}
