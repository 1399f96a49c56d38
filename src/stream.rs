//! Streaming extraction API: emit page outcomes as they complete.
//!
//! ## Why stream?
//!
//! Batches of scanned invoices take a while. A stream-based API lets the
//! upload boundary display per-page results immediately and wire up
//! progress reporting without waiting for the merge. Unlike the eager
//! [`crate::extract`] which returns only after all pages finish,
//! [`extract_stream`] yields each [`PageOutcome`] as its pipeline
//! resolves.
//!
//! Outcomes arrive in completion order, not page order — sort by
//! `page_num`, or feed the collected vector to
//! [`crate::merge::merge_pages`] (which re-sorts internally) to get the
//! same record the eager API produces.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::extract::SharedRuntime;
use crate::pipeline::page::{process_page, PageContext};
use crate::pipeline::{input, render};
use crate::record::PageOutcome;
use futures::stream::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of page outcomes.
pub type PageOutcomeStream = Pin<Box<dyn Stream<Item = PageOutcome> + Send>>;

/// Extract a document, streaming page outcomes as they are ready.
///
/// # Returns
/// - `Ok(PageOutcomeStream)` — one [`PageOutcome`] per page, completion order
/// - `Err(ExtractError)` — fatal error (file not found, not a PDF, provider
///   not configured, over the size/page caps)
pub async fn extract_stream(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<PageOutcomeStream, ExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming extraction: {}", input_str);

    let shared = SharedRuntime::from_config(config)?;

    // ── Resolve input & validate caps ────────────────────────────────────
    let resolved = input::resolve_input(
        input_str,
        config.download_timeout_secs,
        config.max_input_bytes,
    )
    .await?;
    let pdf_path = resolved.path().to_path_buf();

    let metadata = render::extract_metadata(&pdf_path, config.password.as_deref()).await?;
    if metadata.page_count == 0 {
        return Err(ExtractError::CorruptPdf {
            path: pdf_path,
            detail: "document contains no pages".to_string(),
        });
    }
    if metadata.page_count > config.max_pages {
        return Err(ExtractError::TooManyPages {
            pages: metadata.page_count,
            limit: config.max_pages,
        });
    }

    // ── Render, then stream the page pipelines ───────────────────────────
    let renders = render::render_pages(&pdf_path, config).await?;

    let ctx = Arc::new(PageContext {
        config: config.clone(),
        extractor: Arc::clone(&shared.extractor),
        ocr: shared.ocr.clone(),
        cache: Arc::clone(&shared.cache),
        limiter: Arc::clone(&shared.limiter),
    });
    let concurrency = config.page_concurrency;

    let s = futures::stream::iter(renders.into_iter().map(move |rendered| {
        let ctx = Arc::clone(&ctx);
        async move { process_page(ctx, rendered).await }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}
