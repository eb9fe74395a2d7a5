//! In-Process Deduplicator
//!
//! Collapses concurrent identical requests inside one process into a single
//! execution of the delegated work.
//!
//! # Design
//!
//! - Work runs on its own task; every caller awaits a `Shared` handle to it,
//!   so a caller that goes away never cancels work others are waiting on
//! - The handle table is an LRU bounded by entry count and handle age; an
//!   evicted or stale handle lets new callers start independent work
//! - Handles are removed as soon as the work finishes (success, failure or
//!   panic); the table is never a result cache

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinError;
use tracing::{debug, warn};

use crate::keys::log_fingerprint;

/// Default maximum number of tracked in-flight keys
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Default maximum age of an in-flight handle (3 minutes)
pub const DEFAULT_HANDLE_TTL: Duration = Duration::from_secs(3 * 60);

/// Deduplicator configuration
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Maximum tracked keys
    pub max_entries: usize,
    /// Age after which a handle is ignored and replaced
    pub handle_ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            handle_ttl: DEFAULT_HANDLE_TTL,
        }
    }
}

/// Deduplicator counters
#[derive(Debug, Clone, Default)]
pub struct DedupStats {
    /// Executions of delegated work
    pub started: u64,
    /// Callers that joined existing work
    pub joined: u64,
    /// Handles replaced because they outlived the TTL
    pub stale_replaced: u64,
    /// Handles evicted by the LRU while work was outstanding
    pub evicted: u64,
}

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct InFlightHandle<T, E> {
    id: u64,
    started_at: Instant,
    waiters: Arc<AtomicUsize>,
    result: SharedResult<T, E>,
}

type HandleTable<T, E> = Arc<Mutex<LruCache<String, InFlightHandle<T, E>>>>;

/// Removes the handle when the work task ends, however it ends.
struct HandleCleanup<T, E> {
    table: HandleTable<T, E>,
    key: String,
    id: u64,
}

impl<T, E> Drop for HandleCleanup<T, E> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        if table.peek(&self.key).map(|h| h.id) == Some(self.id) {
            table.pop(&self.key);
        }
    }
}

/// Single-flight executor keyed by string
pub struct Deduplicator<T, E> {
    table: HandleTable<T, E>,
    config: DedupConfig,
    next_id: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
    stale_replaced: AtomicU64,
    evicted: AtomicU64,
}

impl<T, E> Deduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    /// Create a deduplicator with default configuration
    pub fn new() -> Self {
        Self::with_config(DedupConfig::default())
    }

    /// Create a deduplicator with custom configuration
    pub fn with_config(config: DedupConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            table: Arc::new(Mutex::new(LruCache::new(capacity))),
            config,
            next_id: AtomicU64::new(1),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
            stale_replaced: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Run `work` for `key` unless it is already running in this process.
    ///
    /// Every concurrent caller for the same key receives a clone of the same
    /// result. `work` is only invoked when this caller starts the execution,
    /// and then on the spawned task, never under the table lock: a panic while
    /// building or polling its future reaches every waiter through
    /// `E::from(JoinError)`. Must be called from within a Tokio runtime.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let fingerprint = log_fingerprint(key);
        let shared = {
            let mut table = self.table.lock();

            let live = match table.get(key) {
                Some(handle) if handle.started_at.elapsed() < self.config.handle_ttl => {
                    let waiters = handle.waiters.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(key = %fingerprint, waiters, "Joining in-flight computation");
                    Some(handle.result.clone())
                }
                Some(handle) => {
                    warn!(
                        key = %fingerprint,
                        age_secs = handle.started_at.elapsed().as_secs(),
                        "In-flight handle outlived its TTL, starting independent work"
                    );
                    self.stale_replaced.fetch_add(1, Ordering::Relaxed);
                    None
                }
                None => None,
            };

            match live {
                Some(shared) => {
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    shared
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let cleanup = HandleCleanup {
                        table: Arc::clone(&self.table),
                        key: key.to_string(),
                        id,
                    };
                    let task = tokio::spawn(async move {
                        let _cleanup = cleanup;
                        work().await
                    });
                    let shared: SharedResult<T, E> = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(E::from(e)),
                        }
                    }
                    .boxed()
                    .shared();

                    let handle = InFlightHandle {
                        id,
                        started_at: Instant::now(),
                        waiters: Arc::new(AtomicUsize::new(1)),
                        result: shared.clone(),
                    };
                    if let Some((evicted_key, evicted)) = table.push(key.to_string(), handle) {
                        if evicted_key != key {
                            self.evicted.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                key = %log_fingerprint(&evicted_key),
                                waiters = evicted.waiters.load(Ordering::Relaxed),
                                "Evicted in-flight handle, its work keeps running"
                            );
                        }
                    }
                    self.started.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %fingerprint, "Started computation");
                    shared
                }
            }
        };

        shared.await
    }
}

impl<T, E> Deduplicator<T, E> {
    /// Number of tracked in-flight keys
    pub fn in_flight(&self) -> usize {
        self.table.lock().len()
    }

    /// Is work for `key` tracked right now
    pub fn contains(&self, key: &str) -> bool {
        self.table.lock().contains(key)
    }

    /// Get configuration
    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Get counters
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            started: self.started.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            stale_replaced: self.stale_replaced.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

impl<T, E> Default for Deduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
