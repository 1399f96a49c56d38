//! Admission control for AI extractor calls.
//!
//! Two budgets gate every call, both shared by all page tasks across all
//! concurrently processed documents:
//!
//! * **In-flight slots** — a `tokio::sync::Semaphore` bounding concurrent
//!   calls. Tokio's semaphore queues waiters FIFO, so no page can be
//!   starved indefinitely under sustained load.
//! * **Per-minute budget** — a `governor` direct rate limiter with a
//!   rolling quota, so bursts of small documents don't trip the remote
//!   service's own limits.
//!
//! [`AiRateLimiter::acquire`] suspends (never busy-waits) until both have
//! headroom, or fails with [`PageError::RateLimitTimeout`] once the
//! caller's patience budget elapses. The returned [`AiPermit`] releases
//! its slot on drop; the minute budget is consumed per acquisition.

use crate::error::PageError;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

type MinuteLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Permission to issue one AI call. Holding it occupies one in-flight slot;
/// dropping it frees the slot.
#[derive(Debug)]
pub struct AiPermit {
    _slot: OwnedSemaphorePermit,
}

/// Shared admission control for the AI extractor.
pub struct AiRateLimiter {
    slots: Arc<Semaphore>,
    minute: MinuteLimiter,
    acquire_timeout: Duration,
}

impl AiRateLimiter {
    /// `max_in_flight` concurrent calls, `calls_per_minute` rolling budget,
    /// and the per-acquire patience before `RateLimitTimeout`.
    pub fn new(max_in_flight: usize, calls_per_minute: u32, acquire_timeout: Duration) -> Self {
        let per_minute =
            NonZeroU32::new(calls_per_minute.max(1)).unwrap_or(NonZeroU32::new(1).unwrap());
        AiRateLimiter {
            slots: Arc::new(Semaphore::new(max_in_flight.max(1))),
            minute: RateLimiter::direct(Quota::per_minute(per_minute)),
            acquire_timeout,
        }
    }

    /// Wait for a slot and minute-budget headroom.
    ///
    /// `page` is the 1-based page number, used only to label the timeout
    /// error. Suspends at both budgets; cancellation-safe (an abandoned
    /// acquire consumes nothing).
    pub async fn acquire(&self, page: usize) -> Result<AiPermit, PageError> {
        let wait = async {
            let slot = match Arc::clone(&self.slots).acquire_owned().await {
                Ok(s) => s,
                // The semaphore lives as long as self and is never closed.
                Err(_) => unreachable!("limiter semaphore closed"),
            };
            self.minute.until_ready().await;
            AiPermit { _slot: slot }
        };

        match tokio::time::timeout(self.acquire_timeout, wait).await {
            Ok(permit) => {
                debug!("page {page}: AI-call slot acquired");
                Ok(permit)
            }
            Err(_) => Err(PageError::RateLimitTimeout {
                page,
                secs: self.acquire_timeout.as_secs(),
            }),
        }
    }
}
