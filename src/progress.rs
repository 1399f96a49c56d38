//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline processes each page.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a Tokio broadcast channel, a WebSocket pushing
//! upload-form updates, a database record, or a terminal progress bar —
//! without the library knowing anything about how the host application
//! communicates. The trait is `Send + Sync` so it works correctly when
//! pages are processed concurrently via `tokio::spawn`.

use crate::record::ExtractionSource;
use std::sync::Arc;

/// Called by the extraction pipeline as it processes each page.
///
/// Implementations must be `Send + Sync` (pages are processed concurrently).
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_page_start`, `on_page_resolved`, and `on_page_failed` may be called
/// concurrently from different threads. Implementations must protect shared
/// mutable state with appropriate synchronisation primitives.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once per document before any page is processed.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page enters the pipeline.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page resolves to a usable attempt.
    ///
    /// `source` is the extractor that produced the result; `from_cache` is
    /// true when it was served from the extraction cache without an AI call.
    fn on_page_resolved(
        &self,
        page_num: usize,
        total_pages: usize,
        source: ExtractionSource,
        from_cache: bool,
    ) {
        let _ = (page_num, total_pages, source, from_cache);
    }

    /// Called when a page fails after all retries are exhausted.
    fn on_page_failed(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once per document after all pages have been attempted.
    fn on_extraction_complete(&self, total_pages: usize, resolved_count: usize) {
        let _ = (total_pages, resolved_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: AtomicUsize,
        resolved: AtomicUsize,
        failed: AtomicUsize,
        cached: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_resolved(
            &self,
            _page_num: usize,
            _total: usize,
            _source: ExtractionSource,
            from_cache: bool,
        ) {
            self.resolved.fetch_add(1, Ordering::SeqCst);
            if from_cache {
                self.cached.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_page_failed(&self, _page_num: usize, _total: usize, _error: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(3);
        cb.on_page_start(1, 3);
        cb.on_page_resolved(1, 3, ExtractionSource::Local, false);
        cb.on_page_failed(2, 3, "some error");
        cb.on_extraction_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let t = TrackingCallback {
            starts: AtomicUsize::new(0),
            resolved: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cached: AtomicUsize::new(0),
        };

        t.on_page_start(1, 3);
        t.on_page_resolved(1, 3, ExtractionSource::Local, false);
        t.on_page_start(2, 3);
        t.on_page_resolved(2, 3, ExtractionSource::Ai, true);
        t.on_page_start(3, 3);
        t.on_page_failed(3, 3, "AI timeout");

        assert_eq!(t.starts.load(Ordering::SeqCst), 3);
        assert_eq!(t.resolved.load(Ordering::SeqCst), 2);
        assert_eq!(t.cached.load(Ordering::SeqCst), 1);
        assert_eq!(t.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn ExtractionProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_extraction_start(10);
        cb.on_page_resolved(1, 10, ExtractionSource::Ai, false);
    }
}
