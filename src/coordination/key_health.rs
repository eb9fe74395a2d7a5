//! Key-Health Tracker
//!
//! Circuit breaker for provider credentials. Errors are counted per
//! credential fingerprint in the store with a cooldown-window TTL; once the
//! count reaches the threshold every process skips the credential until the
//! window lapses or a confirmed success resets it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::keys::credential_fingerprint;
use crate::store::{read_counter, CoordinationStore, Namespace};

/// Default error threshold
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// Default cooldown window (1 hour)
pub const DEFAULT_COOLDOWN_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Key-health configuration
#[derive(Debug, Clone)]
pub struct KeyHealthConfig {
    /// Errors within the window that put a credential into cooldown
    pub error_threshold: u32,
    /// TTL refreshed on every recorded error
    pub cooldown_window: Duration,
}

impl Default for KeyHealthConfig {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            cooldown_window: DEFAULT_COOLDOWN_WINDOW,
        }
    }
}

/// Health of one credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    /// Credential fingerprint
    pub key_hash: String,
    /// Errors inside the current window
    pub error_count: i64,
    /// Most recent recorded error, when known
    pub last_error_at: Option<DateTime<Utc>>,
    /// Credential should be skipped
    pub cooling_down: bool,
}

/// Distributed credential health tracker
pub struct KeyHealthTracker {
    store: Arc<dyn CoordinationStore>,
    config: KeyHealthConfig,
}

impl KeyHealthTracker {
    /// Create a tracker
    pub fn new(store: Arc<dyn CoordinationStore>, config: KeyHealthConfig) -> Self {
        Self { store, config }
    }

    /// Get configuration
    pub fn config(&self) -> &KeyHealthConfig {
        &self.config
    }

    /// Count one failure against a credential
    pub async fn record_error(&self, credential: &str) -> Result<HealthRecord> {
        let key_hash = credential_fingerprint(credential);
        let window = self.config.cooldown_window;

        let count = self
            .store
            .increment(Namespace::KeyHealth, &key_hash, Some(window))
            .await?;

        let now = Utc::now();
        if let Err(e) = self
            .store
            .set(
                Namespace::KeyHealth,
                &last_error_key(&key_hash),
                Bytes::from(now.to_rfc3339()),
                Some(window),
            )
            .await
        {
            debug!(key = %key_hash, error = %e, "Failed to record last error time");
        }

        let cooling_down = self.over_threshold(count);
        if cooling_down && count == i64::from(self.config.error_threshold) {
            warn!(
                key = %key_hash,
                errors = count,
                window_secs = window.as_secs(),
                "Credential entered cooldown"
            );
        } else {
            debug!(key = %key_hash, errors = count, "Recorded credential error");
        }

        Ok(HealthRecord {
            key_hash,
            error_count: count,
            last_error_at: Some(now),
            cooling_down,
        })
    }

    /// Should this credential be skipped. Store errors read as healthy.
    pub async fn is_cooling_down(&self, credential: &str) -> bool {
        let key_hash = credential_fingerprint(credential);
        match read_counter(self.store.as_ref(), Namespace::KeyHealth, &key_hash).await {
            Ok(count) => self.over_threshold(count),
            Err(e) => {
                warn!(key = %key_hash, error = %e, "Key health unavailable, assuming healthy");
                false
            }
        }
    }

    /// Current record of a credential
    pub async fn status(&self, credential: &str) -> Result<HealthRecord> {
        let key_hash = credential_fingerprint(credential);
        let error_count = read_counter(self.store.as_ref(), Namespace::KeyHealth, &key_hash).await?;
        let last_error_at = self
            .store
            .get(Namespace::KeyHealth, &last_error_key(&key_hash))
            .await?
            .and_then(|raw| {
                std::str::from_utf8(&raw)
                    .ok()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|ts| ts.with_timezone(&Utc))
            });

        Ok(HealthRecord {
            cooling_down: self.over_threshold(error_count),
            key_hash,
            error_count,
            last_error_at,
        })
    }

    /// Forget recorded errors after a confirmed success
    pub async fn reset(&self, credential: &str) -> Result<()> {
        let key_hash = credential_fingerprint(credential);
        let existed = self.store.delete(Namespace::KeyHealth, &key_hash).await?;
        self.store
            .delete(Namespace::KeyHealth, &last_error_key(&key_hash))
            .await?;
        if existed {
            info!(key = %key_hash, "Credential health reset");
        }
        Ok(())
    }

    fn over_threshold(&self, count: i64) -> bool {
        count >= i64::from(self.config.error_threshold)
    }
}

fn last_error_key(key_hash: &str) -> String {
    format!("{}:last", key_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn tracker() -> (Arc<InMemoryStore>, KeyHealthTracker) {
        let store = Arc::new(InMemoryStore::new());
        let tracker = KeyHealthTracker::new(store.clone(), KeyHealthConfig::default());
        (store, tracker)
    }

    #[tokio::test]
    async fn test_threshold_enters_cooldown() {
        let (_store, tracker) = tracker();

        for i in 1..DEFAULT_ERROR_THRESHOLD {
            let record = tracker.record_error("sk-live-abc").await.unwrap();
            assert_eq!(record.error_count, i64::from(i));
            assert!(!record.cooling_down);
        }
        assert!(!tracker.is_cooling_down("sk-live-abc").await);

        let record = tracker.record_error("sk-live-abc").await.unwrap();
        assert!(record.cooling_down);
        assert!(tracker.is_cooling_down("sk-live-abc").await);
        assert!(!tracker.is_cooling_down("sk-live-other").await);
    }

    #[tokio::test]
    async fn test_reset_recovers_credential() {
        let (_store, tracker) = tracker();
        for _ in 0..DEFAULT_ERROR_THRESHOLD {
            tracker.record_error("k").await.unwrap();
        }
        assert!(tracker.is_cooling_down("k").await);

        tracker.reset("k").await.unwrap();
        assert!(!tracker.is_cooling_down("k").await);
        let status = tracker.status("k").await.unwrap();
        assert_eq!(status.error_count, 0);
        assert!(status.last_error_at.is_none());
    }

    #[tokio::test]
    async fn test_window_expiry_clears_cooldown() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = KeyHealthTracker::new(
            store,
            KeyHealthConfig {
                error_threshold: 1,
                cooldown_window: Duration::from_millis(20),
            },
        );
        tracker.record_error("k").await.unwrap();
        assert!(tracker.is_cooling_down("k").await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!tracker.is_cooling_down("k").await);
    }

    #[tokio::test]
    async fn test_raw_credential_never_stored() {
        let (store, tracker) = tracker();
        tracker.record_error("sk-secret-value").await.unwrap();

        let fp = credential_fingerprint("sk-secret-value");
        assert!(store.get(Namespace::KeyHealth, &fp).await.unwrap().is_some());
        assert!(store
            .get(Namespace::KeyHealth, "sk-secret-value")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_status_reports_last_error() {
        let (_store, tracker) = tracker();
        tracker.record_error("k").await.unwrap();
        let status = tracker.status("k").await.unwrap();
        assert_eq!(status.error_count, 1);
        assert!(status.last_error_at.is_some());
    }

    #[tokio::test]
    async fn test_store_outage_reads_healthy() {
        let (store, tracker) = tracker();
        for _ in 0..DEFAULT_ERROR_THRESHOLD {
            tracker.record_error("k").await.unwrap();
        }
        store.set_available(false);
        assert!(!tracker.is_cooling_down("k").await);
        assert!(tracker.record_error("k").await.is_err());
    }
}
