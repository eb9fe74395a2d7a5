//! User-Concurrency Limiter
//!
//! Per-user counter of running translations, shared by every process.
//! Acquire is increment-then-compare with an undo; release is a single
//! floor-at-zero decrement inside the store, never read-then-write.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::keys::log_fingerprint;
use crate::store::{read_counter, CoordinationStore, Namespace};

/// Default safety-net TTL of a counter (30 minutes)
pub const DEFAULT_COUNTER_TTL: Duration = Duration::from_secs(30 * 60);

/// Limiter configuration
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Expiry refreshed on every acquire so a crashed process cannot strand a slot
    pub counter_ttl: Duration,
    /// Limit applied when a request does not carry its own
    pub default_limit: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            counter_ttl: DEFAULT_COUNTER_TTL,
            default_limit: 3,
        }
    }
}

/// Distributed per-user concurrency limiter
pub struct ConcurrencyLimiter {
    store: Arc<dyn CoordinationStore>,
    config: LimiterConfig,
}

impl ConcurrencyLimiter {
    /// Create a limiter
    pub fn new(store: Arc<dyn CoordinationStore>, config: LimiterConfig) -> Self {
        Self { store, config }
    }

    /// Get configuration
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Take a slot if the user has fewer than `limit` translations running.
    ///
    /// Returns `true` when the store is unreachable: limiting is best effort.
    pub async fn try_acquire(&self, config_hash: &str, limit: u32) -> bool {
        let user = log_fingerprint(config_hash);
        let count = match self
            .store
            .increment(Namespace::Concurrency, config_hash, Some(self.config.counter_ttl))
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(user = %user, error = %e, "Concurrency counter unavailable, allowing translation");
                return true;
            }
        };

        if count > i64::from(limit) {
            if let Err(e) = self
                .store
                .decrement_floor_zero(Namespace::Concurrency, config_hash)
                .await
            {
                warn!(user = %user, error = %e, "Failed to undo rejected acquire");
            }
            debug!(user = %user, count, limit, "Concurrency limit reached");
            return false;
        }

        debug!(user = %user, count, limit, "Acquired translation slot");
        true
    }

    /// Give a slot back
    pub async fn release(&self, config_hash: &str) {
        match self
            .store
            .decrement_floor_zero(Namespace::Concurrency, config_hash)
            .await
        {
            Ok(remaining) => {
                debug!(user = %log_fingerprint(config_hash), remaining, "Released translation slot")
            }
            Err(e) => warn!(
                user = %log_fingerprint(config_hash),
                error = %e,
                "Failed to release translation slot, counter TTL will reclaim it"
            ),
        }
    }

    /// Current counter value (missing = 0)
    pub async fn current(&self, config_hash: &str) -> Result<i64> {
        read_counter(self.store.as_ref(), Namespace::Concurrency, config_hash).await
    }
}
