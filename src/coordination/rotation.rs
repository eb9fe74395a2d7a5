//! Key-Rotation Counter
//!
//! Round-robin credential selection shared by every process through one
//! atomic counter per provider.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::key_health::KeyHealthTracker;
use crate::store::{CoordinationStore, Namespace};

/// Distributed round-robin counter
pub struct RotationCounter {
    store: Arc<dyn CoordinationStore>,
    // Used while the store is unreachable; not coordinated across processes.
    local: DashMap<String, AtomicU64>,
}

impl RotationCounter {
    /// Create a rotation counter
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            local: DashMap::new(),
        }
    }

    /// Next index in `0..key_count`, or `None` when there are no keys
    pub async fn next_index(&self, provider_id: &str, key_count: usize) -> Option<usize> {
        if key_count == 0 {
            return None;
        }

        let value = match self
            .store
            .increment(Namespace::Rotation, provider_id, None)
            .await
        {
            Ok(v) => v.max(1) as u64,
            Err(e) => {
                warn!(provider = provider_id, error = %e, "Rotation counter unavailable, rotating locally");
                self.local_increment(provider_id)
            }
        };

        Some(((value - 1) % key_count as u64) as usize)
    }

    /// Pick a credential: start at the rotated index and skip keys in cooldown.
    ///
    /// When every key is cooling down the rotated key is returned anyway.
    pub async fn select_key<'a>(
        &self,
        provider_id: &str,
        keys: &'a [String],
        health: &KeyHealthTracker,
    ) -> Option<&'a str> {
        let start = self.next_index(provider_id, keys.len()).await?;

        for offset in 0..keys.len() {
            let candidate = &keys[(start + offset) % keys.len()];
            if !health.is_cooling_down(candidate).await {
                if offset > 0 {
                    debug!(provider = provider_id, skipped = offset, "Skipped credentials in cooldown");
                }
                return Some(candidate.as_str());
            }
        }

        warn!(provider = provider_id, keys = keys.len(), "All credentials cooling down");
        Some(keys[start].as_str())
    }

    fn local_increment(&self, provider_id: &str) -> u64 {
        self.local
            .entry(provider_id.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }
}
