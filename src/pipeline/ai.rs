//! AI extraction: drive the vision-LLM call for escalated pages.
//!
//! The [`VisionExtractor`] trait is the seam to the AI service boundary.
//! The production implementation, [`LlmVisionExtractor`], builds the
//! vision message (system prompt + optional OCR hint + page image), calls
//! the provider, and normalizes the loosely-typed JSON reply into the same
//! field shape the local parser produces — the merge step never
//! special-cases the source.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids thundering-herd: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s. Auth, quota, and invalid-request errors are never
//! retried — they surface immediately as a page failure. A rate-limiter
//! permit is acquired before every attempt, so retries are billed against
//! the same per-minute budget as first calls.

use crate::config::ExtractionConfig;
use crate::error::PageError;
use crate::limiter::AiRateLimiter;
use crate::prompts::{ocr_hint_context, EXTRACTION_SYSTEM_PROMPT};
use crate::record::{fields, AttemptStatus, ExtractionAttempt, ExtractionSource, LineItem};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

// ── Remote error classification ──────────────────────────────────────────

/// Whether a remote failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Timeout, remote rate limit, transient 5xx-class failure — retry
    /// with backoff.
    Transient,
    /// Auth failure, exhausted quota, invalid request — retrying cannot
    /// help; surface immediately.
    Fatal,
}

/// A typed remote failure from the AI service boundary.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        RemoteError {
            kind: RemoteErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        RemoteError {
            kind: RemoteErrorKind::Fatal,
            message: message.into(),
        }
    }
}

/// Markers of non-retryable failures in provider error messages.
///
/// Provider crates flatten HTTP failures into strings, so classification
/// sniffs the message the same way the status line would be read. Unknown
/// errors default to transient — a wasted retry is cheaper than dropping
/// a page that one more attempt would have saved.
const FATAL_MARKERS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "authentication",
    "invalid api key",
    "api key not",
    "quota",
    "billing",
    "invalid request",
    "bad request",
    "unsupported",
];

/// Classify a provider error message. Pure function, tested at the
/// boundaries the retry loop depends on.
pub fn classify_remote_error(message: &str) -> RemoteErrorKind {
    let lower = message.to_lowercase();
    if FATAL_MARKERS.iter().any(|m| lower.contains(m)) {
        RemoteErrorKind::Fatal
    } else {
        RemoteErrorKind::Transient
    }
}

// ── The extractor seam ───────────────────────────────────────────────────

/// Normalized reply from one AI extraction call.
#[derive(Debug, Clone, Default)]
pub struct AiResponse {
    /// Canonical single-value fields, already normalized and non-empty.
    pub fields: BTreeMap<String, String>,
    /// (description, normalized amount) pairs in page order.
    pub line_items: Vec<(String, String)>,
}

/// The AI service boundary: one page image in, structured fields out.
#[async_trait]
pub trait VisionExtractor: Send + Sync {
    async fn extract(&self, image: ImageData, hint: Option<&str>)
        -> Result<AiResponse, RemoteError>;
}

/// Production extractor backed by an `edgequake-llm` provider.
pub struct LlmVisionExtractor {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    api_timeout: Duration,
}

impl LlmVisionExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        LlmVisionExtractor {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

#[async_trait]
impl VisionExtractor for LlmVisionExtractor {
    /// ## Message Layout
    ///
    /// 1. **System message** — the extraction field contract
    /// 2. **Hint message** *(escalate-with-hint only)* — the local OCR text,
    ///    framed as untrusted
    /// 3. **User message** — the page PNG as a base64 image attachment
    ///    (empty text; the image carries all the content)
    async fn extract(
        &self,
        image: ImageData,
        hint: Option<&str>,
    ) -> Result<AiResponse, RemoteError> {
        let mut messages = vec![ChatMessage::system(EXTRACTION_SYSTEM_PROMPT)];
        if let Some(text) = hint {
            if !text.trim().is_empty() {
                messages.push(ChatMessage::system(ocr_hint_context(text)));
            }
        }
        messages.push(ChatMessage::user_with_images("", vec![image]));

        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let call = self.provider.chat(&messages, Some(&options));
        let response = match tokio::time::timeout(self.api_timeout, call).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                let message = format!("{e}");
                return Err(RemoteError {
                    kind: classify_remote_error(&message),
                    message,
                });
            }
            Err(_) => {
                return Err(RemoteError::transient(format!(
                    "API call timed out after {}s",
                    self.api_timeout.as_secs()
                )));
            }
        };

        debug!(
            "AI reply: {} input / {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        // A malformed reply is retried: near-zero temperature makes the
        // model mostly deterministic, but truncation and fence-wrapping
        // still vary between attempts.
        parse_ai_payload(&response.content).map_err(RemoteError::transient)
    }
}

// ── Reply normalization ──────────────────────────────────────────────────

static RE_FENCES: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?").unwrap());
static RE_OUTER_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// String fields longer than this are OCR-of-the-whole-page accidents,
/// not field values.
const MAX_FIELD_LEN: usize = 200;

/// Unwrap and normalize the model's JSON reply.
///
/// Tolerates fence-wrapping and prose around the object. Unknown keys are
/// dropped, empty values are dropped, amounts are normalized, and string
/// fields are capped at [`MAX_FIELD_LEN`] characters.
pub fn parse_ai_payload(raw: &str) -> Result<AiResponse, String> {
    let stripped = RE_FENCES.replace_all(raw, "");
    let object = RE_OUTER_OBJECT
        .find(stripped.trim())
        .ok_or_else(|| format!("no JSON object in reply: {:.80}", raw))?;

    let value: serde_json::Value =
        serde_json::from_str(object.as_str()).map_err(|e| format!("malformed JSON: {e}"))?;
    let map = value
        .as_object()
        .ok_or_else(|| "reply is not a JSON object".to_string())?;

    let mut out = AiResponse::default();

    for &field in fields::ALL {
        let Some(v) = map.get(field) else { continue };
        let text = json_scalar(v);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let value = if fields::AMOUNTS.contains(&field) {
            match crate::pipeline::parse::normalize_amount(text) {
                Some(a) if a != "0" => a,
                _ => continue,
            }
        } else {
            text.chars().take(MAX_FIELD_LEN).collect()
        };
        out.fields.insert(field.to_string(), value);
    }

    if let Some(items) = map.get("line_items").and_then(|v| v.as_array()) {
        for item in items {
            let Some(obj) = item.as_object() else { continue };
            let description = obj
                .get("description")
                .map(|v| json_scalar(v))
                .unwrap_or_default();
            let description: String = description.trim().chars().take(MAX_FIELD_LEN).collect();
            let amount = obj
                .get("amount")
                .map(|v| json_scalar(v))
                .and_then(|a| crate::pipeline::parse::normalize_amount(&a));
            if let (false, Some(amount)) = (description.is_empty(), amount) {
                out.line_items.push((description, amount));
            }
        }
    }

    Ok(out)
}

/// Render a JSON scalar (string or number) as text; anything else is empty.
fn json_scalar(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

// ── Retry loop ───────────────────────────────────────────────────────────

/// Call the AI extractor with admission control and bounded retries.
///
/// Returns the successful attempt plus the retries spent, or the
/// [`PageError`] that exhausted the page. A rate-limiter timeout aborts
/// immediately — if admission control is saturated, backing off and
/// re-queueing would only deepen the queue.
pub(crate) async fn extract_with_retry(
    extractor: &Arc<dyn VisionExtractor>,
    limiter: &AiRateLimiter,
    page_num: usize,
    image: &ImageData,
    hint: Option<&str>,
    config: &ExtractionConfig,
) -> Result<(ExtractionAttempt, u8), PageError> {
    let mut last_err = String::from("no attempt made");

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let _permit = limiter.acquire(page_num).await?;

        match extractor.extract(image.clone(), hint).await {
            Ok(response) => {
                let line_items = response
                    .line_items
                    .into_iter()
                    .map(|(description, amount)| LineItem {
                        description,
                        amount,
                        page: page_num,
                        source: ExtractionSource::Ai,
                    })
                    .collect();

                return Ok((
                    ExtractionAttempt {
                        source: ExtractionSource::Ai,
                        status: AttemptStatus::Ok,
                        fields: response.fields,
                        line_items,
                        confidence: 1.0,
                        raw_text: None,
                        error: None,
                    },
                    attempt as u8,
                ));
            }
            Err(e) => {
                warn!(
                    "Page {}: attempt {} failed — {}",
                    page_num,
                    attempt + 1,
                    e.message
                );
                last_err = e.message;
                if e.kind == RemoteErrorKind::Fatal {
                    return Err(PageError::AiFailed {
                        page: page_num,
                        retries: attempt as u8,
                        detail: last_err,
                    });
                }
            }
        }
    }

    Err(PageError::AiFailed {
        page: page_num,
        retries: config.max_retries as u8,
        detail: last_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn classification_boundaries() {
        assert_eq!(
            classify_remote_error("HTTP 429: rate limit exceeded"),
            RemoteErrorKind::Transient
        );
        assert_eq!(
            classify_remote_error("503 service unavailable"),
            RemoteErrorKind::Transient
        );
        assert_eq!(
            classify_remote_error("request timed out"),
            RemoteErrorKind::Transient
        );
        assert_eq!(
            classify_remote_error("HTTP 401 Unauthorized"),
            RemoteErrorKind::Fatal
        );
        assert_eq!(
            classify_remote_error("quota exceeded for this billing period"),
            RemoteErrorKind::Fatal
        );
        assert_eq!(
            classify_remote_error("Invalid API key provided"),
            RemoteErrorKind::Fatal
        );
        // Unknown errors default to retryable.
        assert_eq!(
            classify_remote_error("connection reset by peer"),
            RemoteErrorKind::Transient
        );
    }

    #[test]
    fn payload_unwraps_fences_and_normalizes() {
        let raw = "```json\n{\"vendor\": \"ACME Ltd\", \"grand_total\": \"1,234.56\", \
                   \"invoice_number\": \"INV-1\", \"tax\": 0, \"due_date\": \"\", \
                   \"line_items\": [{\"description\": \"Toner\", \"amount\": 89.0}]}\n```";
        let resp = parse_ai_payload(raw).unwrap();
        assert_eq!(resp.fields["vendor"], "ACME Ltd");
        assert_eq!(resp.fields["grand_total"], "1234.56");
        assert_eq!(resp.fields["invoice_number"], "INV-1");
        assert!(!resp.fields.contains_key("tax"), "zero amount dropped");
        assert!(!resp.fields.contains_key("due_date"), "empty dropped");
        assert_eq!(resp.line_items, vec![("Toner".to_string(), "89.00".to_string())]);
    }

    #[test]
    fn payload_ignores_prose_around_object() {
        let raw = "Here is the data you asked for:\n{\"vendor\": \"X Corp\"}\nLet me know!";
        let resp = parse_ai_payload(raw).unwrap();
        assert_eq!(resp.fields["vendor"], "X Corp");
    }

    #[test]
    fn payload_rejects_non_json() {
        assert!(parse_ai_payload("I could not read this page.").is_err());
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let resp = parse_ai_payload("{\"vendor\": \"X\", \"adults_over_60\": \"7 million\"}")
            .unwrap();
        assert_eq!(resp.fields.len(), 1);
    }

    // ── Retry loop against a scripted extractor ──────────────────────────

    struct ScriptedExtractor {
        calls: AtomicUsize,
        script: Vec<Result<AiResponse, RemoteError>>,
    }

    #[async_trait]
    impl VisionExtractor for ScriptedExtractor {
        async fn extract(
            &self,
            _image: ImageData,
            _hint: Option<&str>,
        ) -> Result<AiResponse, RemoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .get(n)
                .cloned()
                .unwrap_or_else(|| Err(RemoteError::transient("script exhausted")))
        }
    }

    fn ok_response() -> AiResponse {
        let mut fields = BTreeMap::new();
        fields.insert("invoice_number".to_string(), "INV-9".to_string());
        AiResponse {
            fields,
            line_items: vec![],
        }
    }

    fn test_config() -> ExtractionConfig {
        ExtractionConfig::builder().max_retries(3).build().unwrap()
    }

    fn image() -> ImageData {
        ImageData::new("aGVsbG8=", "image/png")
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_within_budget_succeed() {
        let extractor: Arc<dyn VisionExtractor> = Arc::new(ScriptedExtractor {
            calls: AtomicUsize::new(0),
            script: vec![
                Err(RemoteError::transient("503")),
                Err(RemoteError::transient("timeout")),
                Ok(ok_response()),
            ],
        });
        let limiter = AiRateLimiter::new(4, 600, Duration::from_secs(5));

        let (attempt, retries) =
            extract_with_retry(&extractor, &limiter, 2, &image(), None, &test_config())
                .await
                .expect("third attempt succeeds");

        assert_eq!(retries, 2);
        assert_eq!(attempt.status, AttemptStatus::Ok);
        assert_eq!(attempt.source, ExtractionSource::Ai);
        assert_eq!(attempt.fields["invoice_number"], "INV-9");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_beyond_budget_fail_the_page() {
        let extractor: Arc<dyn VisionExtractor> = Arc::new(ScriptedExtractor {
            calls: AtomicUsize::new(0),
            script: vec![
                Err(RemoteError::transient("503")),
                Err(RemoteError::transient("503")),
                Err(RemoteError::transient("503")),
                Err(RemoteError::transient("503")),
            ],
        });
        let limiter = AiRateLimiter::new(4, 600, Duration::from_secs(5));

        let err = extract_with_retry(&extractor, &limiter, 3, &image(), None, &test_config())
            .await
            .expect_err("budget exhausted");

        assert!(matches!(err, PageError::AiFailed { page: 3, retries: 3, .. }));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let extractor = Arc::new(ScriptedExtractor {
            calls: AtomicUsize::new(0),
            script: vec![Err(RemoteError::fatal("401 unauthorized"))],
        });
        let as_dyn: Arc<dyn VisionExtractor> = extractor.clone();
        let limiter = AiRateLimiter::new(4, 600, Duration::from_secs(5));

        let err = extract_with_retry(&as_dyn, &limiter, 1, &image(), None, &test_config())
            .await
            .expect_err("fatal surfaces immediately");

        assert!(matches!(err, PageError::AiFailed { retries: 0, .. }));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1, "single call only");
    }
}
