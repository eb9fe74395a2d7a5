//! Leader-Election Refresh Coordinator
//!
//! Only one process performs a periodic external refresh. The lock is a
//! set-if-not-exists key with a TTL; the leader publishes a timestamp after a
//! successful refresh so followers reload the result instead of competing.
//!
//! # Refresh cycle
//!
//! ```text
//! newer timestamp published? ── yes ──▶ reload locally (no lock)
//!          │ no
//!          ▼
//!   try_acquire_lock ── Acquired ──▶ refresh ▶ publish ▶ release
//!          │ HeldElsewhere ──▶ re-check after `recheck_delay`
//!          │ Standalone ────▶ refresh as sole leader
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::store::{CoordinationStore, Namespace};

/// Default lock TTL (5 minutes)
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5 * 60);

/// Default delay before a follower re-checks (60 seconds)
pub const DEFAULT_RECHECK_DELAY: Duration = Duration::from_secs(60);

/// Leader-election configuration
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// Lock lifetime; bounds how long a crashed leader blocks others
    pub lock_ttl: Duration,
    /// Wait after losing the election before checking again
    pub recheck_delay: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            recheck_delay: DEFAULT_RECHECK_DELAY,
        }
    }
}

/// Result of a lock attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// This process holds the lock
    Acquired,
    /// Another process holds the lock
    HeldElsewhere,
    /// The store is unreachable; act as the only process
    Standalone,
}

impl LockOutcome {
    /// Should this process perform the guarded work
    pub fn is_leader(&self) -> bool {
        !matches!(self, LockOutcome::HeldElsewhere)
    }
}

/// Lock primitives over the coordination store
pub struct LeaderElection {
    store: Arc<dyn CoordinationStore>,
    owner_id: String,
}

impl LeaderElection {
    /// Create an election client with a fresh owner id
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            owner_id: Uuid::new_v4().to_string(),
        }
    }

    /// Marker written into locks held by this process
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Try to take `lock_id` for `ttl`
    pub async fn try_acquire_lock(&self, lock_id: &str, ttl: Duration) -> LockOutcome {
        match self
            .store
            .set_if_not_exists(
                Namespace::Leader,
                lock_id,
                Bytes::from(self.owner_id.clone()),
                ttl,
            )
            .await
        {
            Ok(true) => {
                debug!(lock = lock_id, owner = %self.owner_id, "Acquired lock");
                LockOutcome::Acquired
            }
            Ok(false) => LockOutcome::HeldElsewhere,
            Err(e) => {
                warn!(lock = lock_id, error = %e, "Lock store unavailable, running standalone");
                LockOutcome::Standalone
            }
        }
    }

    /// Release `lock_id` if this process still owns it.
    ///
    /// The owner check and delete are two steps; a lock that expired and was
    /// re-acquired in between can be removed early. The TTL bounds the damage.
    pub async fn release(&self, lock_id: &str) {
        let owned = match self.store.get(Namespace::Leader, lock_id).await {
            Ok(Some(holder)) => holder.as_ref() == self.owner_id.as_bytes(),
            Ok(None) => false,
            Err(e) => {
                warn!(lock = lock_id, error = %e, "Failed to read lock before release");
                return;
            }
        };
        if !owned {
            debug!(lock = lock_id, "Lock not held by this process, nothing to release");
            return;
        }
        if let Err(e) = self.store.delete(Namespace::Leader, lock_id).await {
            warn!(lock = lock_id, error = %e, "Failed to release lock, it will expire");
        }
    }

    /// Publish the time of a successful refresh
    pub async fn publish_update_timestamp(&self, lock_id: &str, ts: DateTime<Utc>) -> Result<()> {
        self.store
            .set(
                Namespace::Leader,
                &updated_at_key(lock_id),
                Bytes::from(ts.to_rfc3339()),
                None,
            )
            .await
    }

    /// Latest published refresh time
    pub async fn last_update(&self, lock_id: &str) -> Result<Option<DateTime<Utc>>> {
        let raw = self
            .store
            .get(Namespace::Leader, &updated_at_key(lock_id))
            .await?;
        Ok(raw.and_then(|raw| {
            std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|ts| ts.with_timezone(&Utc))
        }))
    }

    /// Has someone published a refresh newer than `local`. Store errors read as no.
    pub async fn has_newer_update_than(&self, lock_id: &str, local: Option<DateTime<Utc>>) -> bool {
        match self.last_update(lock_id).await {
            Ok(published) => is_newer(published, local),
            Err(e) => {
                debug!(lock = lock_id, error = %e, "Could not read refresh timestamp");
                false
            }
        }
    }
}

fn updated_at_key(lock_id: &str) -> String {
    format!("{}:updated_at", lock_id)
}

fn is_newer(published: Option<DateTime<Utc>>, local: Option<DateTime<Utc>>) -> bool {
    match (published, local) {
        (Some(published), Some(local)) => published > local,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

// =============================================================================
// Refresh coordinator
// =============================================================================

/// Work guarded by leader election
#[async_trait]
pub trait RefreshJob: Send + Sync {
    /// Fetch fresh data from the external source. Runs on the leader only.
    async fn refresh(&self) -> anyhow::Result<()>;

    /// Load data another process already refreshed
    async fn reload(&self) -> anyhow::Result<()>;
}

/// What one refresh cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Reloaded a refresh published by another process
    Reloaded,
    /// Refreshed as elected leader and published the timestamp
    Refreshed,
    /// Refreshed without coordination because the store is unreachable
    RefreshedStandalone,
    /// Another process is refreshing; check again after the delay
    Deferred(Duration),
    /// The job failed
    Failed(String),
}

/// Periodic leader-elected refresh of one resource
pub struct RefreshCoordinator {
    election: Arc<LeaderElection>,
    lock_id: String,
    config: LeaderConfig,
    job: Arc<dyn RefreshJob>,
    local_loaded_at: Mutex<Option<DateTime<Utc>>>,
}

impl RefreshCoordinator {
    /// Create a coordinator for `lock_id`
    pub fn new(
        election: Arc<LeaderElection>,
        lock_id: impl Into<String>,
        config: LeaderConfig,
        job: Arc<dyn RefreshJob>,
    ) -> Self {
        Self {
            election,
            lock_id: lock_id.into(),
            config,
            job,
            local_loaded_at: Mutex::new(None),
        }
    }

    /// When this process last loaded the resource
    pub fn local_loaded_at(&self) -> Option<DateTime<Utc>> {
        *self.local_loaded_at.lock()
    }

    /// Run one refresh cycle
    #[instrument(skip(self), fields(lock = %self.lock_id))]
    pub async fn run_once(&self) -> RefreshOutcome {
        let local = self.local_loaded_at();

        match self.election.last_update(&self.lock_id).await {
            Ok(Some(published)) if is_newer(Some(published), local) => {
                return match self.job.reload().await {
                    Ok(()) => {
                        *self.local_loaded_at.lock() = Some(published);
                        info!(published = %published, "Reloaded refresh published by another process");
                        RefreshOutcome::Reloaded
                    }
                    Err(e) => {
                        error!(error = %format!("{:#}", e), "Reload failed");
                        RefreshOutcome::Failed(format!("{:#}", e))
                    }
                };
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Could not read refresh timestamp"),
        }

        match self
            .election
            .try_acquire_lock(&self.lock_id, self.config.lock_ttl)
            .await
        {
            LockOutcome::Acquired => {
                let result = self.job.refresh().await;
                let outcome = match result {
                    Ok(()) => {
                        let now = Utc::now();
                        if let Err(e) = self.election.publish_update_timestamp(&self.lock_id, now).await
                        {
                            warn!(error = %e, "Refreshed but failed to publish timestamp");
                        }
                        *self.local_loaded_at.lock() = Some(now);
                        info!("Refreshed as leader");
                        RefreshOutcome::Refreshed
                    }
                    Err(e) => {
                        error!(error = %format!("{:#}", e), "Refresh failed");
                        RefreshOutcome::Failed(format!("{:#}", e))
                    }
                };
                self.election.release(&self.lock_id).await;
                outcome
            }
            LockOutcome::HeldElsewhere => {
                debug!(
                    recheck_secs = self.config.recheck_delay.as_secs(),
                    "Another process is refreshing"
                );
                RefreshOutcome::Deferred(self.config.recheck_delay)
            }
            LockOutcome::Standalone => match self.job.refresh().await {
                Ok(()) => {
                    *self.local_loaded_at.lock() = Some(Utc::now());
                    info!("Refreshed in standalone mode");
                    RefreshOutcome::RefreshedStandalone
                }
                Err(e) => {
                    error!(error = %format!("{:#}", e), "Standalone refresh failed");
                    RefreshOutcome::Failed(format!("{:#}", e))
                }
            },
        }
    }

    /// Run cycles every `interval` until cancelled.
    ///
    /// After a deferral the next cycle starts after `recheck_delay` instead.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        info!(lock = %self.lock_id, interval_secs = interval.as_secs(), "Starting refresh loop");
        loop {
            let delay = match self.run_once().await {
                RefreshOutcome::Deferred(delay) => delay,
                _ => interval,
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(lock = %self.lock_id, "Refresh loop stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Run `work` once on whichever process wins `lock_id`.
///
/// Returns `None` when another process holds the lock. The lock is released
/// after `work` regardless of its result.
pub async fn run_with_leader_election<F, Fut, T>(
    election: &LeaderElection,
    lock_id: &str,
    ttl: Duration,
    work: F,
) -> Option<anyhow::Result<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match election.try_acquire_lock(lock_id, ttl).await {
        LockOutcome::HeldElsewhere => None,
        LockOutcome::Acquired => {
            let result = work().await;
            election.release(lock_id).await;
            Some(result)
        }
        LockOutcome::Standalone => Some(work().await),
    }
}

// =============================================================================
// Tests
// =============================================================================
