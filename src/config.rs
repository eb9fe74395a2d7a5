//! Coordinator Configuration

use std::time::Duration;

use crate::cache::{TierConfig, MAX_BYPASS_TTL};
use crate::coordination::status::DEFAULT_MARKER_TTL;
use crate::coordination::{KeyHealthConfig, LeaderConfig, LimiterConfig};
use crate::dedup::DedupConfig;
use crate::error::{Error, Result};
use crate::gate::GateConfig;

/// Configuration of every component of a [`TranslationCoordinator`].
///
/// [`TranslationCoordinator`]: crate::service::TranslationCoordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// In-process deduplicator
    pub dedup: DedupConfig,

    /// Cache tier TTLs
    pub tiers: TierConfig,

    /// Repeat-load safety gate
    pub gate: GateConfig,

    /// Per-user concurrency limiter
    pub limiter: LimiterConfig,

    /// Credential circuit breaker
    pub key_health: KeyHealthConfig,

    /// Leader election
    pub leader: LeaderConfig,

    /// Lifetime of distributed in-flight markers
    pub in_flight_marker_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dedup: DedupConfig::default(),
            tiers: TierConfig::default(),
            gate: GateConfig::default(),
            limiter: LimiterConfig::default(),
            key_health: KeyHealthConfig::default(),
            leader: LeaderConfig::default(),
            in_flight_marker_ttl: DEFAULT_MARKER_TTL,
        }
    }
}

impl CoordinatorConfig {
    /// Set the per-user translation limit used by the limiter and the gate
    pub fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.limiter.default_limit = limit;
        self.gate.concurrency_limit = limit;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dedup.max_entries == 0 {
            return Err(Error::Config("dedup.max_entries must be > 0".into()));
        }
        if self.dedup.handle_ttl.is_zero() {
            return Err(Error::Config("dedup.handle_ttl must be > 0".into()));
        }
        if self.tiers.bypass_ttl.is_zero() || self.tiers.bypass_ttl > MAX_BYPASS_TTL {
            return Err(Error::Config(format!(
                "tiers.bypass_ttl must be in 1s..={}s",
                MAX_BYPASS_TTL.as_secs()
            )));
        }
        if self.tiers.partial_ttl < Duration::from_secs(1) {
            return Err(Error::Config("tiers.partial_ttl must be >= 1s".into()));
        }
        if self.gate.threshold < 2 {
            return Err(Error::Config("gate.threshold must be >= 2".into()));
        }
        if self.gate.window.is_zero() {
            return Err(Error::Config("gate.window must be > 0".into()));
        }
        if self.gate.max_tracked == 0 {
            return Err(Error::Config("gate.max_tracked must be > 0".into()));
        }
        if self.limiter.default_limit == 0 {
            return Err(Error::Config("limiter.default_limit must be >= 1".into()));
        }
        if self.limiter.counter_ttl.is_zero() {
            return Err(Error::Config("limiter.counter_ttl must be > 0".into()));
        }
        if self.key_health.error_threshold == 0 {
            return Err(Error::Config("key_health.error_threshold must be >= 1".into()));
        }
        if self.key_health.cooldown_window.is_zero() {
            return Err(Error::Config("key_health.cooldown_window must be > 0".into()));
        }
        if self.leader.lock_ttl.is_zero() {
            return Err(Error::Config("leader.lock_ttl must be > 0".into()));
        }
        if self.in_flight_marker_ttl.is_zero() {
            return Err(Error::Config("in_flight_marker_ttl must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinatorConfig::default();
        assert_ok!(config.validate());
        assert_eq!(config.dedup.max_entries, 500);
        assert_eq!(config.gate.threshold, 3);
        assert_eq!(config.gate.window, Duration::from_secs(5));
        assert_eq!(config.key_health.error_threshold, 5);
        assert_eq!(config.limiter.counter_ttl, Duration::from_secs(30 * 60));
        assert_eq!(config.leader.recheck_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_concurrency_limit_applies_to_gate() {
        let config = CoordinatorConfig::default().with_concurrency_limit(7);
        assert_eq!(config.limiter.default_limit, 7);
        assert_eq!(config.gate.concurrency_limit, 7);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = CoordinatorConfig::default();
        config.tiers.bypass_ttl = Duration::from_secs(13 * 60 * 60);
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let mut config = CoordinatorConfig::default();
        config.gate.threshold = 1;
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = CoordinatorConfig::default().with_concurrency_limit(0);
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }
}
