//! The per-page state machine:
//!
//! ```text
//! rendered → local_extracted → gated → {cache_hit | ai_extracted | failed} → resolved
//! ```
//!
//! [`process_page`] always returns a [`PageOutcome`] — it never propagates
//! an error upward, so one bad page cannot abort its siblings. CPU-bound
//! work (blank detection, PNG encoding, OCR) runs in one `spawn_blocking`
//! hop; everything after the gate is async and suspends at the rate
//! limiter, the AI call, and retry backoff.
//!
//! Escalated pages consult the extraction cache first. On a miss the AI
//! call runs *inside* the cache's coalescing scope, so concurrent requests
//! for byte-identical pages collapse onto a single paid call.

use crate::cache::ExtractionCache;
use crate::config::ExtractionConfig;
use crate::error::PageError;
use crate::limiter::AiRateLimiter;
use crate::pipeline::ai::{self, VisionExtractor};
use crate::pipeline::encode::{self, EncodedPage};
use crate::pipeline::gate::{self, GateConfig, GateDecision};
use crate::pipeline::ocr::{composite_confidence, OcrEngine, OcrText};
use crate::pipeline::parse;
use crate::pipeline::render::{self, PageRender};
use crate::record::{AttemptStatus, ExtractionAttempt, ExtractionSource, PageOutcome};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

/// Everything a page task needs; shared across all pages of a batch.
pub(crate) struct PageContext {
    pub config: ExtractionConfig,
    pub extractor: Arc<dyn VisionExtractor>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub cache: Arc<ExtractionCache>,
    pub limiter: Arc<AiRateLimiter>,
}

/// Outcome of the blocking CPU pass over one rendered page.
enum CpuPass {
    /// Near-uniform pixels: nothing to read, nothing to bill.
    Blank,
    Page {
        encoded: EncodedPage,
        local: LocalPass,
    },
}

enum LocalPass {
    /// `force_ai` or no engine configured.
    Skipped,
    Recognized(Result<OcrText, crate::pipeline::ocr::OcrFault>),
}

/// Drive one page through the full pipeline.
pub(crate) async fn process_page(ctx: Arc<PageContext>, rendered: PageRender) -> PageOutcome {
    let start = Instant::now();

    let page = match rendered {
        PageRender::Ok(p) => p,
        PageRender::Failed { index, detail } => {
            let page_num = index + 1;
            return PageOutcome::failed(
                page_num,
                PageError::RenderFailed {
                    page: page_num,
                    detail,
                },
                start.elapsed().as_millis() as u64,
            );
        }
    };
    let page_num = page.index + 1;

    // ── CPU pass: blank check, encode + fingerprint, local OCR ───────────
    let ocr_engine = ctx.ocr.clone();
    let skip_local = ctx.config.force_ai || ocr_engine.is_none();
    let image = page.image;

    let cpu = tokio::task::spawn_blocking(move || -> Result<CpuPass, String> {
        if render::pixel_stddev(&image) < render::BLANK_STDDEV {
            return Ok(CpuPass::Blank);
        }
        let encoded =
            encode::encode_page(page_num, &image).map_err(|e| format!("image encoding: {e}"))?;
        let local = if skip_local {
            LocalPass::Skipped
        } else {
            // `skip_local` guarantees the engine is present here.
            let engine = ocr_engine.as_ref().unwrap();
            LocalPass::Recognized(engine.recognize(&image))
        };
        Ok(CpuPass::Page { encoded, local })
    })
    .await;

    let cpu = match cpu {
        Ok(Ok(pass)) => pass,
        Ok(Err(detail)) => {
            return PageOutcome::failed(
                page_num,
                PageError::RenderFailed {
                    page: page_num,
                    detail,
                },
                start.elapsed().as_millis() as u64,
            );
        }
        Err(e) => {
            return PageOutcome::failed(
                page_num,
                PageError::RenderFailed {
                    page: page_num,
                    detail: format!("page task panicked: {e}"),
                },
                start.elapsed().as_millis() as u64,
            );
        }
    };

    let (encoded, local) = match cpu {
        CpuPass::Blank => {
            debug!("page {page_num}: blank, skipping extraction");
            return PageOutcome {
                page_num,
                attempt: Some(ExtractionAttempt {
                    source: ExtractionSource::Local,
                    status: AttemptStatus::Ok,
                    fields: BTreeMap::new(),
                    line_items: Vec::new(),
                    confidence: 1.0,
                    raw_text: None,
                    error: None,
                }),
                decision: None,
                from_cache: false,
                retries: 0,
                duration_ms: start.elapsed().as_millis() as u64,
                error: None,
            };
        }
        CpuPass::Page { encoded, local } => (encoded, local),
    };

    // ── Gate ─────────────────────────────────────────────────────────────
    let (status, confidence, text, ocr_fault) = match local {
        LocalPass::Skipped => (AttemptStatus::Failed, 0.0, String::new(), None),
        LocalPass::Recognized(Ok(ocr)) => {
            let conf =
                composite_confidence(&ocr.text, ocr.mean_confidence, &ctx.config.invoice_keywords);
            let status = if conf >= ctx.config.accept_threshold {
                AttemptStatus::Ok
            } else {
                AttemptStatus::LowConfidence
            };
            (status, conf, ocr.text, None)
        }
        LocalPass::Recognized(Err(fault)) => {
            warn!("page {page_num}: OCR fault, escalating — {}", fault.detail);
            (AttemptStatus::Failed, 0.0, String::new(), Some(fault.detail))
        }
    };

    let decision = gate::decide(&GateConfig::from(&ctx.config), status, confidence, &text);
    debug!("page {page_num}: confidence {confidence:.2} → {decision:?}");

    if decision == GateDecision::Accept {
        let (fields, line_items) = parse::parse_invoice_text(&text, page_num);
        return PageOutcome {
            page_num,
            attempt: Some(ExtractionAttempt {
                source: ExtractionSource::Local,
                status: AttemptStatus::Ok,
                fields,
                line_items,
                confidence,
                raw_text: Some(text),
                error: None,
            }),
            decision: Some(decision),
            from_cache: false,
            retries: 0,
            duration_ms: start.elapsed().as_millis() as u64,
            error: None,
        };
    }

    // ── Escalation: cache, then limiter + AI ─────────────────────────────
    let hint = match decision {
        GateDecision::EscalateWithHint => Some(text.as_str()),
        _ => None,
    };

    let retries = Arc::new(AtomicU8::new(0));
    let failure: Arc<Mutex<Option<PageError>>> = Arc::new(Mutex::new(None));
    let image_data = encoded.to_image_data();

    let (attempt, from_cache) = {
        let retries = Arc::clone(&retries);
        let failure = Arc::clone(&failure);
        let task_ctx = Arc::clone(&ctx);
        ctx.cache
            .get_or_extract(encoded.fingerprint, move || async move {
                match ai::extract_with_retry(
                    &task_ctx.extractor,
                    &task_ctx.limiter,
                    page_num,
                    &image_data,
                    hint,
                    &task_ctx.config,
                )
                .await
                {
                    Ok((attempt, spent)) => {
                        retries.store(spent, Ordering::SeqCst);
                        attempt
                    }
                    Err(e) => {
                        if let PageError::AiFailed { retries: spent, .. } = &e {
                            retries.store(*spent, Ordering::SeqCst);
                        }
                        let detail = e.to_string();
                        *failure.lock().expect("failure lock poisoned") = Some(e);
                        ExtractionAttempt::failed(ExtractionSource::Ai, detail)
                    }
                }
            })
            .await
    };

    let retries = retries.load(Ordering::SeqCst);

    // A cache hit carries the computing page's item stamps; claim them for
    // this page so provenance stays truthful.
    let mut attempt = attempt;
    for item in &mut attempt.line_items {
        item.page = page_num;
    }

    if attempt.status == AttemptStatus::Failed {
        // A failed attempt always came from our own closure (failures are
        // never cached), so the captured error is present.
        let error = failure
            .lock()
            .expect("failure lock poisoned")
            .take()
            .unwrap_or_else(|| PageError::AiFailed {
                page: page_num,
                retries,
                detail: attempt.error.clone().unwrap_or_default(),
            });

        // Tie the OCR fault into the report when the escalation it forced
        // also failed.
        let error = match (ocr_fault, error) {
            (Some(ocr_detail), PageError::AiFailed { page, detail, .. }) => PageError::OcrFailed {
                page,
                ocr_detail,
                ai_detail: detail,
            },
            (_, e) => e,
        };

        return PageOutcome::failed(page_num, error, start.elapsed().as_millis() as u64);
    }

    PageOutcome {
        page_num,
        attempt: Some(attempt),
        decision: Some(decision),
        from_cache,
        retries,
        duration_ms: start.elapsed().as_millis() as u64,
        error: None,
    }
}
