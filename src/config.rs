//! Configuration types for invoice extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across tasks, log them, and diff two
//! runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.
//!
//! The confidence thresholds and retry counts are product-tuning
//! parameters, not structural constants — they live here, never hard-coded
//! in pipeline code.

use crate::cache::ExtractionCache;
use crate::error::ExtractError;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Configuration for a PDF-to-invoice extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2invoice::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .accept_threshold(0.85)
///     .ai_calls_per_minute(20)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 200.
    ///
    /// Invoices carry small print (tax ids, line-item tables), so the default
    /// sits above the usual 150: OCR accuracy on 8 pt text degrades sharply
    /// below ~180 DPI while the rendered image stays well below API upload
    /// limits.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap independent of DPI. A 200-DPI render of an A0 sheet could
    /// produce a 13 000 × 18 000 px image and exhaust memory; this caps either
    /// dimension, scaling the other proportionally.
    pub max_rendered_pixels: u32,

    /// Worker-pool size for pages within a document. Default: 4.
    ///
    /// Upstream of, and independent from, the AI-call admission control: more
    /// page workers than AI slots is fine — workers queue at the limiter.
    pub page_concurrency: usize,

    /// Concurrent documents in a batch. Default: 2.
    pub document_concurrency: usize,

    // ── Confidence gate ──────────────────────────────────────────────────
    /// Local OCR confidence at or above which the page is accepted without
    /// any AI call. Range 0.0–1.0, inclusive boundary. Default: 0.80.
    pub accept_threshold: f32,

    /// Local OCR confidence at or above which escalation carries the raw
    /// OCR text as a hint. Range 0.0–1.0, inclusive boundary. Default: 0.50.
    ///
    /// Mid-band text is wrong in places but still orients the model: the
    /// hint cuts output drift on dense pages at no extra image cost.
    pub hint_threshold: f32,

    /// Skip the local pass entirely and escalate every page. Default: false.
    pub force_ai: bool,

    // ── Local OCR ────────────────────────────────────────────────────────
    /// Tesseract language code for the bundled engine. Default: "eng".
    pub ocr_language: String,

    /// Pre-constructed OCR engine. Takes precedence over the bundled
    /// Tesseract engine (`tesseract` feature). `None` with the feature
    /// disabled means every page escalates.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Keywords counted by the composite confidence score. Default: common
    /// English invoice labels. Replace for other locales.
    pub invoice_keywords: Vec<String>,

    // ── AI extractor ─────────────────────────────────────────────────────
    /// LLM model identifier, e.g. "gpt-4.1-nano", "claude-sonnet-4-20250514".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the extraction completion. Default: 0.1.
    ///
    /// Near-zero keeps the model faithful to what is on the page — exactly
    /// what you want when transcribing amounts.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 2048.
    pub max_tokens: usize,

    /// Maximum retry attempts on a transient AI failure. Default: 3.
    ///
    /// Transient errors (429, 5xx, timeouts) are retried; auth/quota/invalid
    /// requests surface immediately as a page failure.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. Exponential backoff
    /// avoids the thundering-herd problem where N concurrent workers retry
    /// simultaneously against a recovering API endpoint.
    pub retry_backoff_ms: u64,

    /// Per-AI-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    // ── Admission control ────────────────────────────────────────────────
    /// Concurrent AI calls in flight across all pages and documents. Default: 4.
    pub max_ai_in_flight: usize,

    /// Rolling per-minute AI-call budget. Default: 40.
    pub ai_calls_per_minute: u32,

    /// How long a page waits for an AI-call slot before failing with
    /// `RateLimitTimeout`. Default: 30.
    pub acquire_timeout_secs: u64,

    // ── Cache ────────────────────────────────────────────────────────────
    /// Extraction-cache capacity in entries (LRU eviction). Default: 512.
    pub cache_capacity: usize,

    /// Extraction-cache entry time-to-live in seconds; `None` disables
    /// expiry. Default: 86 400 (24 h).
    pub cache_ttl_secs: Option<u64>,

    /// Pre-constructed cache, shared across `extract*` calls. When `None`,
    /// each batch builds its own (still shared across its documents).
    pub cache: Option<Arc<ExtractionCache>>,

    // ── Input & limits ───────────────────────────────────────────────────
    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Reject inputs larger than this many bytes. Default: 50 MiB.
    pub max_input_bytes: u64,

    /// Reject documents with more pages than this. Default: 200.
    pub max_pages: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional wall-clock budget for one document in seconds; pages not
    /// finished at the deadline report `Cancelled`. Default: None.
    pub document_timeout_secs: Option<u64>,

    /// Per-page progress events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

/// Default keyword set for the composite OCR confidence score.
fn default_keywords() -> Vec<String> {
    ["invoice", "total", "date", "due", "tax", "vat", "amount", "bill", "payment"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2000,
            page_concurrency: 4,
            document_concurrency: 2,
            accept_threshold: 0.80,
            hint_threshold: 0.50,
            force_ai: false,
            ocr_language: "eng".to_string(),
            ocr_engine: None,
            invoice_keywords: default_keywords(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2048,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            max_ai_in_flight: 4,
            ai_calls_per_minute: 40,
            acquire_timeout_secs: 30,
            cache_capacity: 512,
            cache_ttl_secs: Some(86_400),
            cache: None,
            password: None,
            max_input_bytes: 50 * 1024 * 1024,
            max_pages: 200,
            download_timeout_secs: 120,
            document_timeout_secs: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("page_concurrency", &self.page_concurrency)
            .field("document_concurrency", &self.document_concurrency)
            .field("accept_threshold", &self.accept_threshold)
            .field("hint_threshold", &self.hint_threshold)
            .field("force_ai", &self.force_ai)
            .field("ocr_language", &self.ocr_language)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_retries", &self.max_retries)
            .field("max_ai_in_flight", &self.max_ai_in_flight)
            .field("ai_calls_per_minute", &self.ai_calls_per_minute)
            .field("cache_capacity", &self.cache_capacity)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("document_timeout_secs", &self.document_timeout_secs)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn accept_threshold(mut self, t: f32) -> Self {
        self.config.accept_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn hint_threshold(mut self, t: f32) -> Self {
        self.config.hint_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn force_ai(mut self, v: bool) -> Self {
        self.config.force_ai = v;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn invoice_keywords(mut self, kw: Vec<String>) -> Self {
        self.config.invoice_keywords = kw;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_ai_in_flight(mut self, n: usize) -> Self {
        self.config.max_ai_in_flight = n.max(1);
        self
    }

    pub fn ai_calls_per_minute(mut self, n: u32) -> Self {
        self.config.ai_calls_per_minute = n.max(1);
        self
    }

    pub fn acquire_timeout_secs(mut self, secs: u64) -> Self {
        self.config.acquire_timeout_secs = secs;
        self
    }

    pub fn cache_capacity(mut self, n: usize) -> Self {
        self.config.cache_capacity = n.max(1);
        self
    }

    pub fn cache_ttl_secs(mut self, secs: Option<u64>) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn cache(mut self, cache: Arc<ExtractionCache>) -> Self {
        self.config.cache = Some(cache);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn max_input_bytes(mut self, n: u64) -> Self {
        self.config.max_input_bytes = n;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn document_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.document_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.hint_threshold > c.accept_threshold {
            return Err(ExtractError::InvalidConfig(format!(
                "hint_threshold ({}) must not exceed accept_threshold ({})",
                c.hint_threshold, c.accept_threshold
            )));
        }
        if c.page_concurrency == 0 || c.document_concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let c = ExtractionConfig::builder().build().unwrap();
        assert_eq!(c.dpi, 200);
        assert_eq!(c.accept_threshold, 0.80);
        assert_eq!(c.hint_threshold, 0.50);
        assert_eq!(c.ai_calls_per_minute, 40);
        assert_eq!(c.cache_ttl_secs, Some(86_400));
    }

    #[test]
    fn dpi_is_clamped() {
        let c = ExtractionConfig::builder().dpi(9999).build().unwrap();
        assert_eq!(c.dpi, 400);
        let c = ExtractionConfig::builder().dpi(10).build().unwrap();
        assert_eq!(c.dpi, 72);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let err = ExtractionConfig::builder()
            .accept_threshold(0.4)
            .hint_threshold(0.6)
            .build();
        assert!(matches!(err, Err(ExtractError::InvalidConfig(_))));
    }

    #[test]
    fn thresholds_clamped_to_unit_interval() {
        let c = ExtractionConfig::builder()
            .accept_threshold(3.0)
            .hint_threshold(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.accept_threshold, 1.0);
        assert_eq!(c.hint_threshold, 0.0);
    }
}
