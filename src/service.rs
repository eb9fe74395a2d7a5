//! Translation Coordinator
//!
//! The API request handlers use. One instance per process, built at startup
//! from a store handle and a [`CoordinatorConfig`], then shared behind an `Arc`.
//!
//! ```text
//! get_or_compute
//!   ├─ resolve (partial tier only while in flight) ── hit ──▶ Cached / Partial
//!   └─ miss ─▶ Deduplicator (one execution per key in this process)
//!                ├─ re-check cache
//!                ├─ ConcurrencyLimiter::try_acquire ── full ──▶ ConcurrencyLimit
//!                ├─ TranslationStatus::mark_started
//!                ├─ work(PartialWriter)
//!                ├─ commit / discard partial
//!                └─ mark_finished + release (every path)
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheEntry, PartialEntry, Resolved, TieredCache};
use crate::config::CoordinatorConfig;
use crate::coordination::{
    leader, ConcurrencyLimiter, HealthRecord, KeyHealthTracker, LeaderElection,
    RefreshCoordinator, RefreshJob, RotationCounter, TranslationStatus,
};
use crate::dedup::Deduplicator;
use crate::error::{ComputeError, WorkError};
use crate::gate::{BlockReason, GateDecision, LoadEvent, RepeatLoadGate};
use crate::health::{HealthMonitor, HealthReport};
use crate::keys::{log_fingerprint, CacheKey};
use crate::metrics::{CoordinationMetrics, MetricsSnapshot};
use crate::store::CoordinationStore;

/// A translation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub item_id: String,
    pub target_language: String,
    /// Caller configuration hash, see [`crate::keys::config_hash`]
    pub config_hash: String,
    /// Use the caller's own bypass tier instead of the shared tier
    pub bypass: bool,
    /// Per-request concurrency limit; the configured default otherwise
    pub concurrency_limit: Option<u32>,
}

impl TranslationRequest {
    /// Request against the shared tier
    pub fn new(
        item_id: impl Into<String>,
        target_language: impl Into<String>,
        config_hash: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            target_language: target_language.into(),
            config_hash: config_hash.into(),
            bypass: false,
            concurrency_limit: None,
        }
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// Key this request resolves to
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_request(
            self.item_id.as_str(),
            &self.target_language,
            &self.config_hash,
            self.bypass,
        )
    }

    /// Load event for the same triple, carrying this request's limit
    pub fn load_event(&self) -> LoadEvent {
        let event = LoadEvent::new(
            self.config_hash.as_str(),
            self.item_id.as_str(),
            self.target_language.as_str(),
            self.bypass,
        );
        match self.concurrency_limit {
            Some(limit) => event.with_concurrency_limit(limit),
            None => event,
        }
    }
}

/// What `get_or_compute` served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A committed entry
    Cached(CacheEntry),
    /// Progress of a translation running somewhere
    Partial(PartialEntry),
    /// Freshly computed by the delegated work
    Computed(String),
}

impl Outcome {
    /// Subtitle content
    pub fn content(&self) -> &str {
        match self {
            Outcome::Cached(entry) => &entry.content,
            Outcome::Partial(partial) => &partial.content,
            Outcome::Computed(content) => content,
        }
    }

    /// Is the content final
    pub fn is_complete(&self) -> bool {
        !matches!(self, Outcome::Partial(_))
    }
}

/// Lets delegated work publish progress to concurrent pollers
#[derive(Clone)]
pub struct PartialWriter {
    cache: Arc<TieredCache>,
    key: CacheKey,
}

impl PartialWriter {
    /// Key the progress belongs to
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Overwrite the partial entry. Failures are logged, never returned.
    pub async fn write(&self, content: impl Into<String>) {
        if let Err(e) = self.cache.write_partial(&self.key, content.into()).await {
            warn!(key = %self.key, error = %e, "Failed to publish partial translation");
        }
    }
}

/// Coordinator of cache, dedup, limiter, gate and credential state
pub struct TranslationCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn CoordinationStore>,
    metrics: Arc<CoordinationMetrics>,
    cache: Arc<TieredCache>,
    dedup: Deduplicator<Outcome, ComputeError>,
    status: Arc<TranslationStatus>,
    limiter: Arc<ConcurrencyLimiter>,
    gate: RepeatLoadGate,
    key_health: KeyHealthTracker,
    rotation: RotationCounter,
    election: Arc<LeaderElection>,
    health: HealthMonitor,
}

impl TranslationCoordinator {
    /// Build every component over `store`
    pub fn new(store: Arc<dyn CoordinationStore>, config: CoordinatorConfig) -> Self {
        let metrics = Arc::new(CoordinationMetrics::new());
        let cache = Arc::new(TieredCache::with_metrics(
            store.clone(),
            config.tiers.clone(),
            metrics.clone(),
        ));
        let status = Arc::new(TranslationStatus::new(
            store.clone(),
            config.in_flight_marker_ttl,
        ));
        let limiter = Arc::new(ConcurrencyLimiter::new(
            store.clone(),
            config.limiter.clone(),
        ));
        let gate = RepeatLoadGate::new(
            config.gate.clone(),
            status.clone(),
            limiter.clone(),
            cache.clone(),
            metrics.clone(),
        );

        info!(
            backend = store.backend_name(),
            dedup_entries = config.dedup.max_entries,
            concurrency_limit = config.limiter.default_limit,
            "Translation coordinator initialized"
        );

        Self {
            dedup: Deduplicator::with_config(config.dedup.clone()),
            key_health: KeyHealthTracker::new(store.clone(), config.key_health.clone()),
            rotation: RotationCounter::new(store.clone()),
            election: Arc::new(LeaderElection::new(store.clone())),
            health: HealthMonitor::new(store.clone()),
            config,
            store,
            metrics,
            cache,
            status,
            limiter,
            gate,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Store shared with other processes
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Cache tiers
    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Health monitor, for flipping readiness
    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health
    }

    // =========================================================================
    // Cache consumer API
    // =========================================================================

    /// Serve a translation from cache, or compute it exactly once in this process.
    ///
    /// `work` receives a [`PartialWriter`] for publishing progress and must
    /// enforce its own timeout. It is called on the computation's own task and
    /// runs to completion even if every caller goes away; a panic, before or
    /// after it returns its future, surfaces as [`ComputeError::Aborted`].
    #[instrument(skip_all, fields(item = %request.item_id, lang = %request.target_language, bypass = request.bypass))]
    pub async fn get_or_compute<F, Fut>(
        &self,
        request: TranslationRequest,
        work: F,
    ) -> Result<Outcome, ComputeError>
    where
        F: FnOnce(PartialWriter) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let key = request.cache_key();
        let in_flight = self.status.is_in_flight(&key).await;

        match self.cache.resolve(&key, in_flight).await {
            Resolved::Complete(entry) => return Ok(Outcome::Cached(entry)),
            Resolved::Partial(partial) => return Ok(Outcome::Partial(partial)),
            Resolved::Absent => {}
        }

        let task = ComputeTask {
            cache: self.cache.clone(),
            status: self.status.clone(),
            limiter: self.limiter.clone(),
            metrics: self.metrics.clone(),
            limit: request
                .concurrency_limit
                .unwrap_or(self.config.limiter.default_limit),
            config_hash: request.config_hash,
            key: key.clone(),
        };
        let writer = PartialWriter {
            cache: self.cache.clone(),
            key: key.clone(),
        };

        self.dedup
            .run(&key.storage_key(), move || task.run(work(writer)))
            .await
    }

    /// Feed a client load into the repeat-load gate and purge when it allows.
    pub async fn report_load_event(&self, event: LoadEvent) -> GateDecision {
        let decision = self.gate.on_load_event(&event).await;
        if !decision.should_purge() {
            return decision;
        }

        let key = event.cache_key();
        match self.cache.purge(&key).await {
            Ok(_) => {
                info!(key = %key, "Purged cached translation after repeated loads");
                decision
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Purge failed");
                GateDecision::Blocked(BlockReason::StoreUnavailable)
            }
        }
    }

    /// Take a translation slot for a user
    pub async fn acquire_translation_slot(&self, config_hash: &str, limit: u32) -> bool {
        let acquired = self.limiter.try_acquire(config_hash, limit).await;
        if !acquired {
            self.metrics.record_limit_rejection();
        }
        acquired
    }

    /// Give a translation slot back
    pub async fn release_slot(&self, config_hash: &str) {
        self.limiter.release(config_hash).await;
    }

    /// Count a provider failure against a credential.
    ///
    /// `None` when the store is unreachable.
    pub async fn record_provider_error(&self, credential: &str) -> Option<HealthRecord> {
        match self.key_health.record_error(credential).await {
            Ok(record) => Some(record),
            Err(e) => {
                self.metrics.record_store_error();
                warn!(error = %e, "Could not record credential error");
                None
            }
        }
    }

    /// Is a credential usable (not cooling down)
    pub async fn is_provider_healthy(&self, credential: &str) -> bool {
        !self.key_health.is_cooling_down(credential).await
    }

    /// Clear a credential's errors after a confirmed success
    pub async fn reset_provider(&self, credential: &str) {
        if let Err(e) = self.key_health.reset(credential).await {
            self.metrics.record_store_error();
            warn!(error = %e, "Could not reset credential health");
        }
    }

    /// Next credential for a provider, skipping those in cooldown
    pub async fn next_rotated_key(&self, provider_id: &str, keys: &[String]) -> Option<String> {
        self.rotation
            .select_key(provider_id, keys, &self.key_health)
            .await
            .map(str::to_string)
    }

    // =========================================================================
    // Leader refresh API
    // =========================================================================

    /// Run `work` once if this process wins `lock_id`; `None` otherwise
    pub async fn run_with_leader_election<F, Fut, T>(
        &self,
        lock_id: &str,
        ttl: Duration,
        work: F,
    ) -> Option<anyhow::Result<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        leader::run_with_leader_election(&self.election, lock_id, ttl, work).await
    }

    /// Periodic leader-elected refresh of `lock_id` sharing this process's owner id
    pub fn refresh_coordinator(
        &self,
        lock_id: impl Into<String>,
        job: Arc<dyn RefreshJob>,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(
            self.election.clone(),
            lock_id,
            self.config.leader.clone(),
            job,
        )
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// Counter snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.dedup_joins = self.dedup.stats().joined;
        snapshot.in_flight = self.dedup.in_flight() as u64;
        snapshot
    }

    /// Health report
    pub async fn health(&self) -> HealthReport {
        self.health.report().await
    }
}

/// Everything one computation needs after leaving the caller's stack
struct ComputeTask {
    cache: Arc<TieredCache>,
    status: Arc<TranslationStatus>,
    limiter: Arc<ConcurrencyLimiter>,
    metrics: Arc<CoordinationMetrics>,
    config_hash: String,
    limit: u32,
    key: CacheKey,
}

impl ComputeTask {
    async fn run<Fut>(self, work: Fut) -> Result<Outcome, ComputeError>
    where
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        // Another process may have committed while this one was resolving.
        if let Ok(Some(entry)) = self.cache.get_complete(&self.key).await {
            debug!(key = %self.key, "Committed elsewhere before work started");
            return Ok(Outcome::Cached(entry));
        }

        if !self.limiter.try_acquire(&self.config_hash, self.limit).await {
            self.metrics.record_limit_rejection();
            info!(
                key = %self.key,
                user = %log_fingerprint(&self.config_hash),
                limit = self.limit,
                "Translation rejected by concurrency limit"
            );
            return Err(ComputeError::ConcurrencyLimit { limit: self.limit });
        }

        let token = self.status.mark_started(&self.key).await;
        self.metrics.record_computation();
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(content)) => {
                if let Err(e) = self.cache.commit(&self.key, content.clone()).await {
                    warn!(key = %self.key, error = %e, "Commit failed, serving uncached result");
                }
                info!(
                    key = %self.key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Translation computed"
                );
                Ok(Outcome::Computed(content))
            }
            Ok(Err(e)) => {
                warn!(key = %self.key, error = %format!("{:#}", e), "Translation work failed");
                self.fail().await;
                Err(ComputeError::Work(WorkError::new(e)))
            }
            Err(_) => {
                warn!(key = %self.key, "Translation work panicked");
                self.fail().await;
                Err(ComputeError::Aborted("translation work panicked".to_string()))
            }
        };

        self.status.mark_finished(&self.key, &token).await;
        self.limiter.release(&self.config_hash).await;
        outcome
    }

    async fn fail(&self) {
        self.metrics.record_work_failure();
        if let Err(e) = self.cache.discard_partial(&self.key).await {
            debug!(key = %self.key, error = %e, "Partial entry left to expire");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use futures::future::join_all;

    use super::*;
    use crate::store::InMemoryStore;

    fn coordinator() -> (Arc<InMemoryStore>, TranslationCoordinator) {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = TranslationCoordinator::new(store.clone(), CoordinatorConfig::default());
        (store, coordinator)
    }

    fn request() -> TranslationRequest {
        TranslationRequest::new("tt0133093", "spa", "u1")
    }

    #[tokio::test]
    async fn test_compute_then_cached() {
        let (_store, coord) = coordinator();

        let first = coord
            .get_or_compute(request(), |_| async { Ok("hola".to_string()) })
            .await
            .unwrap();
        assert_eq!(first, Outcome::Computed("hola".into()));

        let second = coord
            .get_or_compute(request(), |_| async { anyhow::bail!("must not run") })
            .await
            .unwrap();
        assert_matches!(second, Outcome::Cached(ref e) if e.content == "hola");
        assert!(second.is_complete());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_computation() {
        let (_store, coord) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..8).map(|_| {
            let calls = calls.clone();
            coord.get_or_compute(request(), move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok("hola".to_string())
            })
        });
        let results = join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, Ok(outcome) if outcome.content() == "hola")));
        assert_eq!(coord.metrics().dedup_joins, 7);
        assert_eq!(coord.metrics().computations, 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_commits_nothing() {
        let (_store, coord) = coordinator();

        let requests = (0..3).map(|_| {
            coord.get_or_compute(request(), |writer| async move {
                writer.write("1\n00:00:01,000 --> 00:00:02,000\nHo").await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                anyhow::bail!("provider quota exceeded")
            })
        });
        for result in join_all(requests).await {
            assert_matches!(result, Err(ComputeError::Work(ref e)) if e.to_string().contains("quota"));
        }

        let key = request().cache_key();
        assert!(!coord.cache().exists(&key).await.unwrap());
        assert!(coord.cache().get_partial(&key).await.unwrap().is_none());
        assert_eq!(coord.metrics().work_failures, 1);
    }

    #[tokio::test]
    async fn test_second_poller_sees_partial() {
        let (_store, coord) = coordinator();
        let coord = Arc::new(coord);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let first = {
            let coord = coord.clone();
            tokio::spawn(async move {
                coord
                    .get_or_compute(request(), |writer| async move {
                        writer.write("1\n...\nHola").await;
                        let _ = rx.await;
                        Ok("complete".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = coord
            .get_or_compute(request(), |_| async { anyhow::bail!("must not run") })
            .await
            .unwrap();
        assert_matches!(second, Outcome::Partial(ref p) if p.content == "1\n...\nHola");
        assert!(!second.is_complete());

        tx.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), Outcome::Computed("complete".into()));
    }

    #[tokio::test]
    async fn test_concurrency_limit_rejects() {
        let (_store, coord) = coordinator();
        assert!(coord.acquire_translation_slot("u1", 1).await);

        let result = coord
            .get_or_compute(request().with_concurrency_limit(1), |_| async {
                Ok("x".to_string())
            })
            .await;
        assert_matches!(result, Err(ComputeError::ConcurrencyLimit { limit: 1 }));
        assert_eq!(coord.metrics().limit_rejections, 1);

        coord.release_slot("u1").await;
        let result = coord
            .get_or_compute(request().with_concurrency_limit(1), |_| async {
                Ok("x".to_string())
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_slot_and_markers_cleared_after_work() {
        let (_store, coord) = coordinator();
        coord
            .get_or_compute(request(), |_| async { Ok("x".to_string()) })
            .await
            .unwrap();

        let key = request().cache_key();
        assert!(!coord.status.is_in_flight(&key).await);
        assert_eq!(coord.limiter.current("u1").await.unwrap(), 0);
        assert_eq!(coord.metrics().in_flight, 0);
    }

    #[tokio::test]
    async fn test_panicking_work_cleans_up() {
        let (_store, coord) = coordinator();
        let result = coord
            .get_or_compute(request(), |_| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let crash = true;
                if crash {
                    panic!("decoder crashed");
                }
                Ok(String::new())
            })
            .await;
        assert_matches!(result, Err(ComputeError::Aborted(_)));
        assert_eq!(coord.limiter.current("u1").await.unwrap(), 0);
        assert!(!coord.status.is_in_flight(&request().cache_key()).await);
    }

    #[tokio::test]
    async fn test_synchronous_panic_in_work_is_aborted() {
        let (_store, coord) = coordinator();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            coord.get_or_compute(request(), |_writer| {
                let model: Option<&str> = None;
                let name = model.expect("model missing").to_string();
                async move { Ok(name) }
            }),
        )
        .await
        .expect("coordinator must not hang");
        assert_matches!(result, Err(ComputeError::Aborted(_)));
        assert_eq!(coord.limiter.current("u1").await.unwrap(), 0);

        let next = tokio::time::timeout(
            Duration::from_secs(5),
            coord.get_or_compute(request(), |_| async { Ok("hola".to_string()) }),
        )
        .await
        .expect("key usable after a panic")
        .unwrap();
        assert_eq!(next, Outcome::Computed("hola".into()));
    }

    #[tokio::test]
    async fn test_replaced_handle_keeps_gate_closed_until_last_finishes() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = CoordinatorConfig::default();
        config.dedup.handle_ttl = Duration::from_millis(20);
        let coord = Arc::new(TranslationCoordinator::new(store, config));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let slow = {
            let coord = coord.clone();
            tokio::spawn(async move {
                coord
                    .get_or_compute(request(), |_| async move {
                        let _ = rx.await;
                        Ok("slow".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fast = coord
            .get_or_compute(request(), |_| async { Ok("fast".to_string()) })
            .await
            .unwrap();
        assert_eq!(fast, Outcome::Computed("fast".into()));

        let event = request().load_event();
        coord.report_load_event(event.clone()).await;
        coord.report_load_event(event.clone()).await;
        assert_eq!(
            coord.report_load_event(event.clone()).await,
            GateDecision::Blocked(BlockReason::InProgress)
        );

        tx.send(()).unwrap();
        assert_eq!(slow.await.unwrap().unwrap(), Outcome::Computed("slow".into()));
        assert!(!coord.status.is_in_flight(&request().cache_key()).await);

        coord.report_load_event(event.clone()).await;
        coord.report_load_event(event.clone()).await;
        assert!(coord.report_load_event(event).await.should_purge());
    }

    #[test]
    fn test_load_event_carries_request_limit() {
        let event = request().with_concurrency_limit(1).load_event();
        assert_eq!(event.concurrency_limit, Some(1));
        assert_eq!(event.cache_key(), request().cache_key());
        assert_eq!(request().load_event().concurrency_limit, None);
    }

    #[tokio::test]
    async fn test_bypass_is_isolated_from_shared() {
        let (_store, coord) = coordinator();
        coord
            .get_or_compute(request().with_bypass(true), |_| async { Ok("mine".to_string()) })
            .await
            .unwrap();

        let shared = coord
            .get_or_compute(request(), |_| async { Ok("shared".to_string()) })
            .await
            .unwrap();
        assert_eq!(shared, Outcome::Computed("shared".into()));
    }

    #[tokio::test]
    async fn test_load_burst_purges_entry() {
        let (_store, coord) = coordinator();
        coord
            .get_or_compute(request(), |_| async { Ok("bad".to_string()) })
            .await
            .unwrap();

        let event = LoadEvent::new("u1", "tt0133093", "spa", false);
        assert!(!coord.report_load_event(event.clone()).await.should_purge());
        assert!(!coord.report_load_event(event.clone()).await.should_purge());
        assert!(coord.report_load_event(event).await.should_purge());

        let recomputed = coord
            .get_or_compute(request(), |_| async { Ok("good".to_string()) })
            .await
            .unwrap();
        assert_eq!(recomputed, Outcome::Computed("good".into()));
        assert_eq!(coord.metrics().purges, 1);
    }

    #[tokio::test]
    async fn test_store_outage_still_computes() {
        let (store, coord) = coordinator();
        store.set_available(false);

        let result = coord
            .get_or_compute(request(), |_| async { Ok("standalone".to_string()) })
            .await
            .unwrap();
        assert_eq!(result, Outcome::Computed("standalone".into()));
        assert_eq!(coord.metrics().commit_failures, 1);
        assert!(coord.is_provider_healthy("sk-1").await);
        assert!(coord.record_provider_error("sk-1").await.is_none());
    }

    #[tokio::test]
    async fn test_credential_helpers() {
        let (_store, coord) = coordinator();
        let keys = vec!["sk-a".to_string(), "sk-b".to_string()];

        for _ in 0..5 {
            coord.record_provider_error("sk-a").await.unwrap();
        }
        assert!(!coord.is_provider_healthy("sk-a").await);
        assert_eq!(coord.next_rotated_key("gemini", &keys).await.as_deref(), Some("sk-b"));

        coord.reset_provider("sk-a").await;
        assert!(coord.is_provider_healthy("sk-a").await);
        assert_eq!(coord.next_rotated_key("gemini", &keys).await.as_deref(), Some("sk-b"));
        assert_eq!(coord.next_rotated_key("gemini", &keys).await.as_deref(), Some("sk-a"));
    }
}
