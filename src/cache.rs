//! Content-addressed extraction cache with request coalescing.
//!
//! Maps a page's [`Fingerprint`] to a previously computed AI extraction so
//! byte-identical pages (double-rendered continuation sheets, re-uploaded
//! batches, retries) never pay for a second AI call.
//!
//! ## Coalescing
//!
//! Concurrent requests for the same fingerprint must collapse onto a single
//! underlying AI call. Each fingerprint gets a gate (`tokio::sync::Mutex`)
//! handed out under the store lock: the first task through the gate computes
//! and stores; tasks queued behind it re-check the store on wake and find
//! the result. Gates are removed when their last waiter leaves, which is
//! decided under the store lock, so a fresh waiter can never race past a
//! departing one into a second concurrent compute.
//!
//! Failed computations are NOT stored: the next requester for that
//! fingerprint retries, still serialised by the gate.
//!
//! ## Eviction
//!
//! Bounded capacity with least-recently-used eviction plus an optional
//! time-to-live. Results are returned as owned clones, so evicting an entry
//! never invalidates a result a reader already holds.

use crate::record::{AttemptStatus, ExtractionAttempt, Fingerprint};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Hit/miss counters, exposed through [`ExtractionCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct StoredEntry {
    attempt: ExtractionAttempt,
    created: Instant,
}

struct Inner {
    entries: HashMap<Fingerprint, StoredEntry>,
    /// Access order, most recently used at the front.
    lru: VecDeque<Fingerprint>,
    /// Per-fingerprint coalescing gates for in-flight computations.
    pending: HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>,
    hits: u64,
    misses: u64,
}

/// Thread-safe, coalescing LRU+TTL cache of AI extraction results.
pub struct ExtractionCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl ExtractionCache {
    /// Create a cache holding at most `capacity` entries, each living at
    /// most `ttl` (no expiry when `None`).
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        ExtractionCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru: VecDeque::with_capacity(capacity),
                pending: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Look up a fingerprint, refreshing its recency on hit.
    pub fn get(&self, fp: &Fingerprint) -> Option<ExtractionAttempt> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        self.lookup_locked(&mut inner, fp)
    }

    /// Store a successful attempt. Attempts with any other status are
    /// silently ignored — failures must stay retryable.
    pub fn put(&self, fp: Fingerprint, attempt: ExtractionAttempt) {
        if attempt.status != AttemptStatus::Ok {
            return;
        }
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.entries.contains_key(&fp) {
            // Refreshed entry keeps its position update simple: re-front it.
            inner.lru.retain(|k| k != &fp);
        } else if inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner.lru.pop_back() {
                inner.entries.remove(&oldest);
                debug!("cache evicted {oldest}");
            }
        }
        inner.lru.push_front(fp);
        inner.entries.insert(
            fp,
            StoredEntry {
                attempt,
                created: Instant::now(),
            },
        );
    }

    /// Return the cached attempt for `fp`, or run `compute` to produce it.
    ///
    /// The second element of the returned pair is true when the attempt was
    /// served from the cache (including results computed by a coalesced
    /// sibling task while this one waited at the gate).
    pub async fn get_or_extract<F, Fut>(
        &self,
        fp: Fingerprint,
        compute: F,
    ) -> (ExtractionAttempt, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExtractionAttempt>,
    {
        // Fast path: already stored.
        if let Some(hit) = self.get(&fp) {
            return (hit, true);
        }

        // Acquire this fingerprint's gate. Cloned under the store lock so
        // gate identity is consistent with gate removal below.
        let gate = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            Arc::clone(
                inner
                    .pending
                    .entry(fp)
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        let result = {
            let _guard = gate.lock().await;

            // A coalesced sibling may have stored the result while we waited.
            if let Some(hit) = self.get(&fp) {
                (hit, true)
            } else {
                let attempt = compute().await;
                self.put(fp, attempt.clone());
                (attempt, false)
            }
        };

        // Drop the gate once its last waiter leaves. strong_count is read
        // under the store lock, the same lock any new waiter needs to clone
        // the gate, so the count cannot change under us.
        {
            let mut inner = self.inner.lock().expect("cache lock poisoned");
            let last_waiter = inner
                .pending
                .get(&fp)
                .map(|g| Arc::strong_count(g) == 2)
                .unwrap_or(false);
            if last_waiter {
                inner.pending.remove(&fp);
            }
        }

        result
    }

    /// Current counters and entry count.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache lock poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }

    fn lookup_locked(&self, inner: &mut Inner, fp: &Fingerprint) -> Option<ExtractionAttempt> {
        if let Some(entry) = inner.entries.get(fp) {
            let expired = self
                .ttl
                .map(|ttl| entry.created.elapsed() > ttl)
                .unwrap_or(false);
            if expired {
                inner.entries.remove(fp);
                inner.lru.retain(|k| k != fp);
                inner.misses += 1;
                debug!("cache entry expired for {fp}");
                return None;
            }
            inner.lru.retain(|k| k != fp);
            inner.lru.push_front(*fp);
            inner.hits += 1;
            return Some(inner.entries[fp].attempt.clone());
        }
        inner.misses += 1;
        None
    }
}
