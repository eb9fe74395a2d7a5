//! Translation Status
//!
//! Tracks which cache keys are being computed: a process-local count per key
//! that is authoritative for this process only, plus a TTL-bounded marker in
//! the store that other processes can see.
//!
//! Two computations of one key can overlap (a stale dedup handle was
//! replaced, or another process started its own). The local count drops the
//! flag only when the last of them finishes, and each marker carries the
//! token of the computation that wrote it so only that computation clears it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::keys::CacheKey;
use crate::store::{CoordinationStore, Namespace};

/// Default lifetime of the distributed in-flight marker (10 minutes)
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(10 * 60);

/// Identifies one computation's in-flight marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightToken(String);

impl InFlightToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Token as written to the store
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// In-progress bookkeeping for translations
pub struct TranslationStatus {
    store: Arc<dyn CoordinationStore>,
    local: DashMap<String, usize>,
    marker_ttl: Duration,
}

impl TranslationStatus {
    /// Create a status tracker
    pub fn new(store: Arc<dyn CoordinationStore>, marker_ttl: Duration) -> Self {
        Self {
            store,
            local: DashMap::new(),
            marker_ttl,
        }
    }

    /// Mark a key as being computed by this process.
    ///
    /// The local count is always raised; a failed marker write only costs
    /// other processes their visibility into this computation. The returned
    /// token must be handed back to [`mark_finished`](Self::mark_finished).
    pub async fn mark_started(&self, key: &CacheKey) -> InFlightToken {
        let storage_key = key.storage_key();
        let running = {
            let mut count = self.local.entry(storage_key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let token = InFlightToken::generate();
        let marker = Bytes::from(token.0.clone());
        if let Err(e) = self
            .store
            .set(Namespace::InFlight, &storage_key, marker, Some(self.marker_ttl))
            .await
        {
            warn!(key = %key, error = %e, "Failed to publish in-flight marker");
        } else {
            debug!(key = %key, running, "Marked translation in progress");
        }
        token
    }

    /// Finish one computation of a key.
    ///
    /// The local flag stays while other computations of the key run here.
    /// The distributed marker is deleted only if it still holds `token`.
    pub async fn mark_finished(&self, key: &CacheKey, token: &InFlightToken) {
        let storage_key = key.storage_key();
        if let Entry::Occupied(mut count) = self.local.entry(storage_key.clone()) {
            if *count.get() <= 1 {
                count.remove();
            } else {
                *count.get_mut() -= 1;
            }
        }

        // Read then delete: a marker rewritten in between may be removed,
        // which its TTL and the writer's local flag cover.
        match self.store.get(Namespace::InFlight, &storage_key).await {
            Ok(Some(current)) if current.as_ref() == token.as_str().as_bytes() => {
                if let Err(e) = self.store.delete(Namespace::InFlight, &storage_key).await {
                    warn!(key = %key, error = %e, "Failed to clear in-flight marker");
                }
            }
            Ok(Some(_)) => {
                debug!(key = %key, "In-flight marker belongs to another computation");
            }
            Ok(None) => {}
            Err(e) => {
                // The marker TTL bounds how long other processes see it.
                warn!(key = %key, error = %e, "Failed to clear in-flight marker");
            }
        }
    }

    /// Is this process computing the key
    pub fn is_in_progress_local(&self, key: &CacheKey) -> bool {
        self.local.contains_key(&key.storage_key())
    }

    /// Does any process advertise the key as in flight
    pub async fn has_distributed_marker(&self, key: &CacheKey) -> Result<bool> {
        Ok(self
            .store
            .get(Namespace::InFlight, &key.storage_key())
            .await?
            .is_some())
    }

    /// Local flag or distributed marker, with store errors read as "not in flight"
    pub async fn is_in_flight(&self, key: &CacheKey) -> bool {
        if self.is_in_progress_local(key) {
            return true;
        }
        match self.has_distributed_marker(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "In-flight marker lookup failed");
                false
            }
        }
    }

    /// Number of keys this process is computing
    pub fn local_count(&self) -> usize {
        self.local.len()
    }
}
