//! Repeat-Load Safety Gate
//!
//! A user forces a stale translation to be recomputed by loading the same
//! subtitle several times in quick succession. The gate counts loads per
//! (configuration, item, language) triple in a sliding window and, when the
//! threshold is reached, decides whether purging the cached entry is safe.
//!
//! # Decision
//!
//! ```text
//! load ─▶ window += now ─▶ below threshold ─▶ Recorded
//!                   │ threshold reached: window reset
//!                   ▼
//!      in progress locally?        ─▶ Blocked(InProgress)
//!      in-flight marker present?   ─▶ Blocked(DistributedInFlight)
//!      user at concurrency limit?  ─▶ Blocked(ConcurrencyLimit)
//!      nothing cached?             ─▶ NothingCached
//!      otherwise                   ─▶ Purge
//! ```
//!
//! Store failures while checking block the purge: purging is destructive, so
//! the gate fails safe where everything else fails open.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::TieredCache;
use crate::coordination::{ConcurrencyLimiter, TranslationStatus};
use crate::keys::{log_fingerprint, CacheKey};
use crate::metrics::CoordinationMetrics;

/// Default sliding window (5 seconds)
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default number of loads that trigger a purge
pub const DEFAULT_THRESHOLD: usize = 3;

/// Default number of tracked triples
pub const DEFAULT_MAX_TRACKED: usize = 10_000;

/// Gate configuration
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Sliding window length
    pub window: Duration,
    /// Loads inside the window that trigger the safety check
    pub threshold: usize,
    /// Maximum tracked triples (LRU)
    pub max_tracked: usize,
    /// Running translations at which a purge is pointless
    pub concurrency_limit: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            threshold: DEFAULT_THRESHOLD,
            max_tracked: DEFAULT_MAX_TRACKED,
            concurrency_limit: 3,
        }
    }
}

/// A client loaded a translated subtitle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEvent {
    /// Caller configuration hash
    pub config_hash: String,
    /// Source item
    pub item_id: String,
    /// Target language
    pub target_language: String,
    /// Caller uses the bypass tier
    pub bypass: bool,
    /// Caller's own concurrency limit, if it differs from the gate default
    pub concurrency_limit: Option<u32>,
}

impl LoadEvent {
    /// Create a load event
    pub fn new(
        config_hash: impl Into<String>,
        item_id: impl Into<String>,
        target_language: impl Into<String>,
        bypass: bool,
    ) -> Self {
        Self {
            config_hash: config_hash.into(),
            item_id: item_id.into(),
            target_language: target_language.into(),
            bypass,
            concurrency_limit: None,
        }
    }

    /// Check the safety gate against this caller's limit
    pub fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// Cache key a purge would hit
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_request(
            self.item_id.as_str(),
            &self.target_language,
            &self.config_hash,
            self.bypass,
        )
    }

    fn window_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.config_hash,
            self.item_id,
            self.target_language.trim().to_lowercase()
        )
    }
}

/// Why a purge was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// This process is computing the key
    InProgress,
    /// Another process advertises the key as in flight
    DistributedInFlight,
    /// The user cannot start another translation
    ConcurrencyLimit { current: i64, limit: u32 },
    /// The safety check could not reach the store
    StoreUnavailable,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::InProgress => write!(f, "translation in progress"),
            BlockReason::DistributedInFlight => write!(f, "translation in flight elsewhere"),
            BlockReason::ConcurrencyLimit { current, limit } => {
                write!(f, "concurrency limit reached ({}/{})", current, limit)
            }
            BlockReason::StoreUnavailable => write!(f, "coordination store unavailable"),
        }
    }
}

/// Outcome of a load event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Counted; threshold not reached
    Recorded { loads: usize },
    /// Threshold reached but purging is unsafe
    Blocked(BlockReason),
    /// Threshold reached but there is nothing to purge
    NothingCached,
    /// Purge the entry and recompute
    Purge,
}

impl GateDecision {
    /// Should the caller purge and retrigger the translation
    pub fn should_purge(&self) -> bool {
        matches!(self, GateDecision::Purge)
    }
}

/// Repeat-load detector with a safety check
pub struct RepeatLoadGate {
    config: GateConfig,
    windows: Mutex<LruCache<String, VecDeque<Instant>>>,
    status: Arc<TranslationStatus>,
    limiter: Arc<ConcurrencyLimiter>,
    cache: Arc<TieredCache>,
    metrics: Arc<CoordinationMetrics>,
}

impl RepeatLoadGate {
    /// Create a gate
    pub fn new(
        config: GateConfig,
        status: Arc<TranslationStatus>,
        limiter: Arc<ConcurrencyLimiter>,
        cache: Arc<TieredCache>,
        metrics: Arc<CoordinationMetrics>,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.max_tracked).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            windows: Mutex::new(LruCache::new(capacity)),
            status,
            limiter,
            cache,
            metrics,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Record a load now
    pub async fn on_load_event(&self, event: &LoadEvent) -> GateDecision {
        self.on_load_event_at(event, Instant::now()).await
    }

    /// Record a load at `now`
    pub async fn on_load_event_at(&self, event: &LoadEvent, now: Instant) -> GateDecision {
        let loads = self.record(event, now);
        let key = event.cache_key();

        if loads < self.config.threshold {
            debug!(key = %key, loads, "Load recorded");
            return GateDecision::Recorded { loads };
        }

        self.metrics.record_gate_trigger();
        info!(
            key = %key,
            user = %log_fingerprint(&event.config_hash),
            loads,
            "Repeated loads detected, evaluating purge"
        );

        if let Some(reason) = self.check_blocked(event, &key).await {
            self.metrics.record_gate_block();
            info!(key = %key, reason = %reason, "Purge blocked");
            return GateDecision::Blocked(reason);
        }

        match self.cache.exists(&key).await {
            Ok(true) => GateDecision::Purge,
            Ok(false) => {
                info!(key = %key, "Repeated loads but nothing cached, skipping purge");
                GateDecision::NothingCached
            }
            Err(e) => {
                self.metrics.record_gate_block();
                warn!(key = %key, error = %e, "Cache lookup failed, purge blocked");
                GateDecision::Blocked(BlockReason::StoreUnavailable)
            }
        }
    }

    /// Number of tracked triples
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }

    /// Loads currently inside the window for a triple
    pub fn window_len(&self, event: &LoadEvent) -> usize {
        self.windows
            .lock()
            .peek(&event.window_key())
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    // Appends `now`, prunes, and resets the window once the threshold is hit.
    fn record(&self, event: &LoadEvent, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let window = windows.get_or_insert_mut(event.window_key(), VecDeque::new);

        while let Some(&oldest) = window.front() {
            if now.saturating_duration_since(oldest) > self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }
        window.push_back(now);

        let loads = window.len();
        if loads >= self.config.threshold {
            window.clear();
        }
        loads
    }

    async fn check_blocked(&self, event: &LoadEvent, key: &CacheKey) -> Option<BlockReason> {
        if self.status.is_in_progress_local(key) {
            return Some(BlockReason::InProgress);
        }

        match self.status.has_distributed_marker(key).await {
            Ok(true) => return Some(BlockReason::DistributedInFlight),
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "In-flight marker lookup failed");
                return Some(BlockReason::StoreUnavailable);
            }
        }

        let limit = event
            .concurrency_limit
            .unwrap_or(self.config.concurrency_limit);
        match self.limiter.current(&event.config_hash).await {
            Ok(current) if current >= i64::from(limit) => {
                Some(BlockReason::ConcurrencyLimit { current, limit })
            }
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Concurrency counter lookup failed");
                Some(BlockReason::StoreUnavailable)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
