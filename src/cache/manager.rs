//! Cache Manager - Three-Tier Translation Cache
//!
//! Resolves a [`CacheKey`] against the permanent (shared), bypass (per-user)
//! and partial (in-progress) tiers, all held in the coordination store.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::entry::{CacheEntry, PartialEntry, Resolved};
use crate::error::Result;
use crate::keys::{CacheKey, Scope};
use crate::metrics::CoordinationMetrics;
use crate::store::{CoordinationStore, Namespace};

/// Upper bound for bypass-tier TTL (12 hours)
pub const MAX_BYPASS_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Default partial-tier TTL (10 minutes)
pub const DEFAULT_PARTIAL_TTL: Duration = Duration::from_secs(10 * 60);

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Shared, never expires
    Permanent,
    /// Per-user, bounded TTL
    Bypass,
    /// In-progress, short TTL
    Partial,
}

impl CacheTier {
    /// Tier that holds committed results for a scope
    pub fn for_scope(scope: &Scope) -> Self {
        match scope {
            Scope::Shared => CacheTier::Permanent,
            Scope::User(_) => CacheTier::Bypass,
        }
    }

    /// Store namespace of this tier
    pub fn namespace(&self) -> Namespace {
        match self {
            CacheTier::Permanent => Namespace::Permanent,
            CacheTier::Bypass => Namespace::Bypass,
            CacheTier::Partial => Namespace::Partial,
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::Permanent => write!(f, "permanent"),
            CacheTier::Bypass => write!(f, "bypass"),
            CacheTier::Partial => write!(f, "partial"),
        }
    }
}

/// Tier configuration
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Bypass-tier TTL, clamped to [`MAX_BYPASS_TTL`]
    pub bypass_ttl: Duration,
    /// Partial-tier TTL
    pub partial_ttl: Duration,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            bypass_ttl: MAX_BYPASS_TTL,
            partial_ttl: DEFAULT_PARTIAL_TTL,
        }
    }
}

impl TierConfig {
    /// Bypass TTL after clamping
    pub fn effective_bypass_ttl(&self) -> Duration {
        self.bypass_ttl.min(MAX_BYPASS_TTL).max(Duration::from_secs(1))
    }
}

/// Multi-tier cache over the coordination store
pub struct TieredCache {
    store: Arc<dyn CoordinationStore>,
    config: TierConfig,
    metrics: Arc<CoordinationMetrics>,
}

impl TieredCache {
    /// Create a cache with its own metrics collector
    pub fn new(store: Arc<dyn CoordinationStore>, config: TierConfig) -> Self {
        Self::with_metrics(store, config, Arc::new(CoordinationMetrics::new()))
    }

    /// Create a cache reporting into a shared metrics collector
    pub fn with_metrics(
        store: Arc<dyn CoordinationStore>,
        config: TierConfig,
        metrics: Arc<CoordinationMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Resolve a key.
    ///
    /// Reads the tier of the key's scope. The partial tier is consulted only
    /// when `in_flight` says someone is computing this key right now. Store
    /// errors resolve to a miss.
    pub async fn resolve(&self, key: &CacheKey, in_flight: bool) -> Resolved {
        match self.get_complete(key).await {
            Ok(Some(entry)) => {
                match key.scope() {
                    Scope::Shared => self.metrics.record_permanent_hit(),
                    Scope::User(_) => self.metrics.record_bypass_hit(),
                }
                return Resolved::Complete(entry);
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.record_store_error();
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
            }
        }

        if in_flight {
            match self.get_partial(key).await {
                Ok(Some(partial)) => {
                    self.metrics.record_partial_hit();
                    debug!(key = %key, "Serving partial result of in-flight translation");
                    return Resolved::Partial(partial);
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_store_error();
                    warn!(key = %key, error = %e, "Partial read failed, treating as miss");
                }
            }
        }

        self.metrics.record_miss();
        Resolved::Absent
    }

    /// Committed entry in the key's tier
    pub async fn get_complete(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let tier = CacheTier::for_scope(key.scope());
        let entry: Option<CacheEntry> = self.read(tier, key).await?;
        Ok(entry.filter(|e| !e.is_expired()))
    }

    /// Partial entry for the key
    pub async fn get_partial(&self, key: &CacheKey) -> Result<Option<PartialEntry>> {
        let partial: Option<PartialEntry> = self.read(CacheTier::Partial, key).await?;
        Ok(partial.filter(|p| !p.is_expired()))
    }

    /// Commit a complete result to the key's tier and drop its partial entry.
    ///
    /// Shared keys are written permanently; user keys with the bypass TTL.
    pub async fn commit(&self, key: &CacheKey, content: String) -> Result<CacheEntry> {
        let tier = CacheTier::for_scope(key.scope());
        let (entry, ttl) = match tier {
            CacheTier::Bypass => {
                let ttl = self.config.effective_bypass_ttl();
                (CacheEntry::new(content, ttl.as_secs()), Some(ttl))
            }
            _ => (CacheEntry::new(content, 0), None),
        };

        if let Err(e) = self.write(tier, key, &entry, ttl).await {
            self.metrics.record_commit_failure();
            return Err(e);
        }
        self.metrics.record_commit();
        debug!(key = %key, tier = %tier, "Committed translation");

        if let Err(e) = self.discard_partial(key).await {
            // Left to expire on its own.
            warn!(key = %key, error = %e, "Failed to delete partial entry after commit");
        }

        Ok(entry)
    }

    /// Publish progress for an in-flight computation
    pub async fn write_partial(&self, key: &CacheKey, content: String) -> Result<PartialEntry> {
        let ttl = self.config.partial_ttl;
        let partial = PartialEntry::new(content, ttl.as_secs());
        self.write(CacheTier::Partial, key, &partial, Some(ttl))
            .await?;
        Ok(partial)
    }

    /// Delete the partial entry for a key
    pub async fn discard_partial(&self, key: &CacheKey) -> Result<bool> {
        self.store
            .delete(Namespace::Partial, &key.storage_key())
            .await
    }

    /// Check if a committed entry exists in the key's tier
    pub async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.get_complete(key).await?.is_some())
    }

    /// Remove the committed entry and any partial entry for a key
    pub async fn purge(&self, key: &CacheKey) -> Result<bool> {
        let tier = CacheTier::for_scope(key.scope());
        let deleted = self
            .store
            .delete(tier.namespace(), &key.storage_key())
            .await?;
        self.discard_partial(key).await?;
        if deleted {
            self.metrics.record_purge();
        }
        Ok(deleted)
    }

    async fn read<T: DeserializeOwned>(&self, tier: CacheTier, key: &CacheKey) -> Result<Option<T>> {
        let raw = match self
            .store
            .get(tier.namespace(), &key.storage_key())
            .await?
        {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, tier = %tier, error = %e, "Unreadable cache record, treating as miss");
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize>(
        &self,
        tier: CacheTier,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        self.store
            .set(tier.namespace(), &key.storage_key(), payload, ttl)
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================
