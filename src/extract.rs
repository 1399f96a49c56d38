//! Eager (full-document) extraction entry points and the batch
//! orchestrator.
//!
//! ## Orchestration model
//!
//! Pages fan out as spawned tasks over a bounded worker pool
//! (`page_concurrency`), independent of and upstream of the AI-call
//! admission control. Outcomes are collected over a channel and
//! reassembled **by page index**, so task completion order never leaks
//! into the record. Documents in a batch fan out the same way under
//! `document_concurrency`, sharing one extraction cache and one rate
//! limiter.
//!
//! ## Document timeout
//!
//! When `document_timeout_secs` is set, collection stops at the deadline
//! and unfinished pages report `Cancelled`. The spawned page tasks are
//! *not* aborted: an AI call already in flight runs to completion in the
//! background and its result still lands in the shared cache, so billed
//! work is never silently discarded.

use crate::cache::ExtractionCache;
use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::limiter::AiRateLimiter;
use crate::merge;
use crate::pipeline::ai::{LlmVisionExtractor, VisionExtractor};
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::page::{process_page, PageContext};
use crate::pipeline::render::PageRender;
use crate::pipeline::{input, render};
use crate::record::{
    DocumentMetadata, ExtractionOutput, ExtractionSource, ExtractionStats, PageOutcome,
};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Extract one invoice document (local path or URL).
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ExtractionOutput)` whenever at least the document could be rendered,
/// even if pages failed — check `output.record.status` and
/// `output.stats.failed_pages`.
///
/// # Errors
/// Returns `Err(ExtractError)` only for fatal errors: file not found, not
/// a valid PDF, provider not configured, over the size/page caps.
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let shared = SharedRuntime::from_config(config)?;
    extract_with_shared(input_str.as_ref(), config, &shared).await
}

/// Extract invoice records from a batch of documents.
///
/// Documents run concurrently under `document_concurrency`, sharing one
/// extraction cache and one AI rate limiter. A failed document yields its
/// own `Err` entry and never aborts its siblings; results keep input
/// order. The outer `Err` covers configuration-level failures only
/// (provider not configured, invalid config).
pub async fn extract_batch<I, S>(
    inputs: I,
    config: &ExtractionConfig,
) -> Result<Vec<Result<ExtractionOutput, ExtractError>>, ExtractError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let shared = SharedRuntime::from_config(config)?;
    let results = stream::iter(
        inputs
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>(),
    )
    .map(|input_str| {
        let shared = shared.clone();
        async move { extract_with_shared(&input_str, config, &shared).await }
    })
    .buffered(config.document_concurrency)
    .collect()
    .await;

    Ok(results)
}

/// Extract from PDF bytes in memory.
///
/// This is the upload-boundary form: the caller holds the PDF as a byte
/// stream, not a file. Internally the bytes go to a managed [`tempfile`]
/// that is cleaned up automatically on return or panic.
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| ExtractError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    // `tmp` is dropped (and the file deleted) when `extract` returns
    extract(&path, config).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Extract PDF metadata without processing content.
///
/// Does not require an OCR engine, an AI provider, or an API key.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, ExtractError> {
    let resolved = input::resolve_input(input_str.as_ref(), 120, u64::MAX).await?;
    render::extract_metadata(resolved.path(), None).await
}

// ── Shared runtime ───────────────────────────────────────────────────────

/// The pieces every document of a batch shares: the AI extractor, the OCR
/// engine, the extraction cache, and the rate limiter.
#[derive(Clone)]
pub(crate) struct SharedRuntime {
    pub extractor: Arc<dyn VisionExtractor>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub cache: Arc<ExtractionCache>,
    pub limiter: Arc<AiRateLimiter>,
}

impl SharedRuntime {
    pub(crate) fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let provider = resolve_provider(config)?;
        let extractor: Arc<dyn VisionExtractor> =
            Arc::new(LlmVisionExtractor::new(provider, config));

        let cache = config.cache.clone().unwrap_or_else(|| {
            Arc::new(ExtractionCache::new(
                config.cache_capacity,
                config.cache_ttl_secs.map(Duration::from_secs),
            ))
        });

        let limiter = Arc::new(AiRateLimiter::new(
            config.max_ai_in_flight,
            config.ai_calls_per_minute,
            Duration::from_secs(config.acquire_timeout_secs),
        ));

        Ok(SharedRuntime {
            extractor,
            ocr: resolve_ocr_engine(config),
            cache,
            limiter,
        })
    }
}

/// Pick the local OCR engine, reporting a missing one once per batch.
///
/// Order: caller-injected engine, then the bundled Tesseract engine
/// (`tesseract` feature). With neither, every page escalates.
fn resolve_ocr_engine(config: &ExtractionConfig) -> Option<Arc<dyn OcrEngine>> {
    if let Some(engine) = &config.ocr_engine {
        return Some(Arc::clone(engine));
    }
    bundled_ocr_engine(config)
}

#[cfg(feature = "tesseract")]
fn bundled_ocr_engine(config: &ExtractionConfig) -> Option<Arc<dyn OcrEngine>> {
    match crate::pipeline::ocr::TesseractEngine::new(&config.ocr_language) {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            warn!("local OCR unavailable, all pages will escalate: {e}");
            None
        }
    }
}

#[cfg(not(feature = "tesseract"))]
fn bundled_ocr_engine(_config: &ExtractionConfig) -> Option<Arc<dyn OcrEngine>> {
    warn!("no local OCR engine configured, all pages will escalate");
    None
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the AI provider, from most-specific to least-specific.
///
/// The four-level fallback chain lets library users and CLI users each set
/// exactly as much or as little as they need:
///
/// 1. **Pre-built provider** (`config.provider`) — the caller constructed
///    and configured the provider entirely; used as-is. Useful in tests or
///    when the caller needs custom middleware.
///
/// 2. **Named provider + model** (`config.provider_name`) — reads the
///    corresponding API key (`OPENAI_API_KEY`, etc.) from the environment.
///
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
///    — a provider and model chosen at the execution-environment level
///    (Makefile, shell script, CI). Checked before full auto-detection so
///    the model choice is honoured even when multiple API keys are present.
///
/// 4. **Full auto-detection** (`ProviderFactory::from_env`) — the factory
///    scans all known API key variables and picks the first available
///    provider.
fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    // 1) User-provided provider takes priority
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    // 2) Provider name + model
    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_vision_provider(name, model);
    }

    // 3) Environment pair
    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    // Prefer OpenAI explicitly when an OpenAI API key is present, so users
    // with multiple provider keys get a deterministic default.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_vision_provider("openai", model);
        }
    }

    // 4) Full auto-detection
    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No AI provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

// ── Document orchestration ───────────────────────────────────────────────

pub(crate) async fn extract_with_shared(
    input_str: &str,
    config: &ExtractionConfig,
    shared: &SharedRuntime,
) -> Result<ExtractionOutput, ExtractError> {
    let total_start = Instant::now();
    info!("Starting extraction: {}", input_str);

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(
        input_str,
        config.download_timeout_secs,
        config.max_input_bytes,
    )
    .await?;
    let pdf_path = resolved.path().to_path_buf();

    // ── Step 2: Metadata & document caps ─────────────────────────────────
    let metadata = render::extract_metadata(&pdf_path, config.password.as_deref()).await?;
    let total_pages = metadata.page_count;
    info!("PDF has {} pages", total_pages);

    if total_pages == 0 {
        return Err(ExtractError::CorruptPdf {
            path: pdf_path,
            detail: "document contains no pages".to_string(),
        });
    }
    if total_pages > config.max_pages {
        return Err(ExtractError::TooManyPages {
            pages: total_pages,
            limit: config.max_pages,
        });
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(total_pages);
    }

    // ── Step 3: Rasterise pages ──────────────────────────────────────────
    let render_start = Instant::now();
    let renders = render::render_pages(&pdf_path, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", renders.len(), render_duration_ms);

    // ── Step 4: Run page pipelines ───────────────────────────────────────
    let extract_start = Instant::now();
    let ctx = Arc::new(PageContext {
        config: config.clone(),
        extractor: Arc::clone(&shared.extractor),
        ocr: shared.ocr.clone(),
        cache: Arc::clone(&shared.cache),
        limiter: Arc::clone(&shared.limiter),
    });

    let deadline = config
        .document_timeout_secs
        .map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let outcomes = run_page_pipelines(ctx, renders, deadline).await;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    // ── Step 5: Merge into one record ────────────────────────────────────
    let record = merge::merge_pages(&outcomes);

    // ── Step 6: Stats ────────────────────────────────────────────────────
    let resolved_pages = outcomes.iter().filter(|o| o.is_resolved()).count();
    let failed_pages = outcomes.len() - resolved_pages;
    let stats = ExtractionStats {
        total_pages,
        resolved_pages,
        failed_pages,
        local_pages: outcomes
            .iter()
            .filter(|o| {
                o.is_resolved()
                    && o.attempt.as_ref().map(|a| a.source) == Some(ExtractionSource::Local)
            })
            .count(),
        ai_pages: outcomes
            .iter()
            .filter(|o| {
                o.is_resolved()
                    && !o.from_cache
                    && o.attempt.as_ref().map(|a| a.source) == Some(ExtractionSource::Ai)
            })
            .count(),
        cached_pages: outcomes.iter().filter(|o| o.from_cache).count(),
        ai_calls: outcomes
            .iter()
            .filter(|o| match (&o.attempt, &o.error) {
                (Some(a), None) => a.source == ExtractionSource::Ai && !o.from_cache,
                (_, Some(PageError::AiFailed { .. } | PageError::OcrFailed { .. })) => true,
                _ => false,
            })
            .count(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        render_duration_ms,
        extract_duration_ms,
    };

    info!(
        "Extraction complete: {}/{} pages, {} AI calls, {}ms total",
        resolved_pages, total_pages, stats.ai_calls, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(total_pages, resolved_pages);
    }

    Ok(ExtractionOutput {
        record,
        pages: outcomes,
        metadata,
        stats,
    })
}

/// Fan the page pipeline out over a bounded worker pool and reassemble
/// outcomes by page index.
///
/// Page tasks are spawned (not merely polled) so an optional deadline can
/// stop the *collection* without aborting in-flight work; tasks past the
/// deadline run to completion in the background and feed the shared cache.
pub(crate) async fn run_page_pipelines(
    ctx: Arc<PageContext>,
    renders: Vec<PageRender>,
    deadline: Option<tokio::time::Instant>,
) -> Vec<PageOutcome> {
    let total = renders.len();
    let expected: Vec<usize> = renders
        .iter()
        .map(|r| match r {
            PageRender::Ok(p) => p.index + 1,
            PageRender::Failed { index, .. } => index + 1,
        })
        .collect();

    let pool = Arc::new(Semaphore::new(ctx.config.page_concurrency));
    let (tx, mut rx) = mpsc::unbounded_channel::<PageOutcome>();

    for rendered in renders {
        let ctx = Arc::clone(&ctx);
        let pool = Arc::clone(&pool);
        let tx = tx.clone();
        let page_num = match &rendered {
            PageRender::Ok(p) => p.index + 1,
            PageRender::Failed { index, .. } => index + 1,
        };

        // Detached on purpose: see the deadline note above.
        tokio::spawn(async move {
            let _slot = match Arc::clone(&pool).acquire_owned().await {
                Ok(s) => s,
                Err(_) => return,
            };

            if let Some(ref cb) = ctx.config.progress_callback {
                cb.on_page_start(page_num, total);
            }

            let outcome = process_page(Arc::clone(&ctx), rendered).await;

            if let Some(ref cb) = ctx.config.progress_callback {
                match (&outcome.attempt, &outcome.error) {
                    (Some(a), None) => {
                        cb.on_page_resolved(page_num, total, a.source, outcome.from_cache)
                    }
                    (_, Some(e)) => cb.on_page_failed(page_num, total, &e.to_string()),
                    _ => {}
                }
            }

            let _ = tx.send(outcome);
        });
    }
    drop(tx);

    let mut outcomes: Vec<PageOutcome> = Vec::with_capacity(total);
    loop {
        let next = match deadline {
            Some(at) => match tokio::time::timeout_at(at, rx.recv()).await {
                Ok(v) => v,
                Err(_) => {
                    warn!("document deadline reached with {} pages pending", total - outcomes.len());
                    break;
                }
            },
            None => rx.recv().await,
        };
        match next {
            Some(outcome) => {
                debug!("page {} finished", outcome.page_num);
                outcomes.push(outcome);
                if outcomes.len() == total {
                    break;
                }
            }
            None => break,
        }
    }

    // Pages that missed the deadline report Cancelled.
    let seen: HashSet<usize> = outcomes.iter().map(|o| o.page_num).collect();
    for page_num in expected {
        if !seen.contains(&page_num) {
            outcomes.push(PageOutcome::failed(
                page_num,
                PageError::Cancelled { page: page_num },
                0,
            ));
        }
    }

    outcomes.sort_by_key(|o| o.page_num);
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ai::{AiResponse, RemoteError, VisionExtractor};
    use crate::pipeline::ocr::{OcrEngine, OcrFault, OcrText};
    use crate::pipeline::render::RenderedPage;
    use crate::record::{AttemptStatus, DocumentStatus};
    use async_trait::async_trait;
    use edgequake_llm::ImageData;
    use image::{DynamicImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    /// Checkerboard page with a per-page brightness byte: distinct `seed`s
    /// give distinct pixel content, equal `seed`s give byte-identical pages.
    fn page_image(seed: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(image::GrayImage::from_fn(64, 64, move |x, y| {
            if (x + y) % 2 == 0 {
                Luma([seed])
            } else {
                Luma([255])
            }
        }))
    }

    fn rendered(index: usize, seed: u8) -> PageRender {
        PageRender::Ok(RenderedPage {
            index,
            image: page_image(seed),
        })
    }

    /// OCR stub: bright pages read cleanly, dark pages come back garbled.
    struct StubOcr;

    impl OcrEngine for StubOcr {
        fn recognize(&self, image: &DynamicImage) -> Result<OcrText, OcrFault> {
            let first = image.to_luma8().as_raw()[0];
            if first > 128 {
                Ok(OcrText {
                    text: CLEAN_INVOICE_TEXT.to_string(),
                    mean_confidence: 93.0,
                })
            } else {
                Ok(OcrText {
                    text: "%$#@!".to_string(),
                    mean_confidence: 21.0,
                })
            }
        }
    }

    /// AI stub returning three line items, counting its calls.
    struct CountingExtractor {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl VisionExtractor for CountingExtractor {
        async fn extract(
            &self,
            _image: ImageData,
            _hint: Option<&str>,
        ) -> Result<AiResponse, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AiResponse {
                fields: Default::default(),
                line_items: vec![
                    ("Item four".to_string(), "4.00".to_string()),
                    ("Item five".to_string(), "5.00".to_string()),
                    ("Item six".to_string(), "6.00".to_string()),
                ],
            })
        }
    }

    /// AI stub that never resolves — for deadline tests.
    struct StuckExtractor;

    #[async_trait]
    impl VisionExtractor for StuckExtractor {
        async fn extract(
            &self,
            _image: ImageData,
            _hint: Option<&str>,
        ) -> Result<AiResponse, RemoteError> {
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn context(
        extractor: Arc<dyn VisionExtractor>,
        ocr: Option<Arc<dyn OcrEngine>>,
    ) -> Arc<PageContext> {
        let config = ExtractionConfig::builder().build().unwrap();
        Arc::new(PageContext {
            extractor,
            ocr,
            cache: Arc::new(ExtractionCache::new(64, None)),
            limiter: Arc::new(AiRateLimiter::new(4, 600, Duration::from_secs(5))),
            config,
        })
    }

    #[tokio::test]
    async fn high_confidence_single_page_never_calls_ai() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(
            Arc::new(CountingExtractor {
                calls: Arc::clone(&calls),
            }),
            Some(Arc::new(StubOcr)),
        );

        let outcomes = run_page_pipelines(ctx, vec![rendered(0, 200)], None).await;
        let record = merge::merge_pages(&outcomes);

        assert_eq!(calls.load(Ordering::SeqCst), 0, "zero AI calls");
        assert_eq!(record.status, DocumentStatus::Complete);
        assert_eq!(record.resolved["grand_total"], "126.74");
        assert_eq!(record.resolved["invoice_number"], "INV-2024-0042");
        assert!(record
            .provenance
            .iter()
            .all(|p| p.source == ExtractionSource::Local));

        let attempt = outcomes[0].attempt.as_ref().unwrap();
        assert_eq!(attempt.source, ExtractionSource::Local);
        assert_eq!(attempt.status, AttemptStatus::Ok);
    }

    #[tokio::test]
    async fn duplicate_page_resolves_from_cache_with_one_ai_call() {
        // Page 1 reads cleanly; page 2 escalates; page 3 is byte-identical
        // to page 2 and must coalesce/hit the cache.
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(
            Arc::new(CountingExtractor {
                calls: Arc::clone(&calls),
            }),
            Some(Arc::new(StubOcr)),
        );

        let outcomes = run_page_pipelines(
            ctx,
            vec![rendered(0, 200), rendered(1, 10), rendered(2, 10)],
            None,
        )
        .await;
        let record = merge::merge_pages(&outcomes);

        assert_eq!(calls.load(Ordering::SeqCst), 1, "pages 2+3 share one call");
        assert_eq!(
            outcomes.iter().filter(|o| o.from_cache).count(),
            1,
            "exactly one page served from cache"
        );

        // Line items: the three parsed locally from page 1, then items
        // 4/5/6 from the AI page; the identical page-3 items deduplicate.
        let items: Vec<&str> = record
            .line_items
            .iter()
            .map(|i| i.description.as_str())
            .collect();
        assert_eq!(
            items,
            vec![
                "Paper A4 500 sheets",
                "Toner cartridge black",
                "Delivery",
                "Item four",
                "Item five",
                "Item six"
            ]
        );
        assert_eq!(record.status, DocumentStatus::Complete);
    }

    #[tokio::test]
    async fn render_failure_is_contained_to_its_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(
            Arc::new(CountingExtractor {
                calls: Arc::clone(&calls),
            }),
            Some(Arc::new(StubOcr)),
        );

        let outcomes = run_page_pipelines(
            ctx,
            vec![
                rendered(0, 200),
                PageRender::Failed {
                    index: 1,
                    detail: "corrupt page object".to_string(),
                },
            ],
            None,
        )
        .await;
        let record = merge::merge_pages(&outcomes);

        assert_eq!(record.status, DocumentStatus::Partial);
        assert!(outcomes[0].is_resolved());
        assert!(matches!(
            outcomes[1].error,
            Some(PageError::RenderFailed { page: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_unfinished_pages() {
        let ctx = context(Arc::new(StuckExtractor), None);

        let deadline = tokio::time::Instant::now() + Duration::from_millis(100);
        let outcomes = run_page_pipelines(ctx, vec![rendered(0, 10)], Some(deadline)).await;

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].error,
            Some(PageError::Cancelled { page: 1 })
        ));
    }

    #[tokio::test]
    async fn outcomes_are_ordered_by_page_index() {
        let ctx = context(
            Arc::new(CountingExtractor {
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Some(Arc::new(StubOcr)),
        );

        let renders: Vec<PageRender> = (0..6).map(|i| rendered(i, 200)).collect();
        let outcomes = run_page_pipelines(ctx, renders, None).await;
        let pages: Vec<usize> = outcomes.iter().map(|o| o.page_num).collect();
        assert_eq!(pages, vec![1, 2, 3, 4, 5, 6]);
    }
}
