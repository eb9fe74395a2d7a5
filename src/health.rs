//! Health Checks
//!
//! Liveness and readiness of a coordinator node. An unreachable store makes
//! the node `Degraded`, not unready: every primitive falls back to standalone
//! mode and requests keep being served.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::store::CoordinationStore;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// Fully coordinated
    Healthy,
    /// Serving without cross-process coordination
    Degraded,
    /// Not serving
    Unhealthy,
}

impl HealthStatus {
    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Result of one check
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: u64,
}

impl HealthCheckResult {
    fn new(name: &str, status: HealthStatus, message: Option<String>, latency: Duration) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            latency_ms: latency.as_millis() as u64,
        }
    }
}

/// Aggregated health of a node
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status among the checks
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthReport {
    fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max_by_key(HealthStatus::severity)
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Health monitor of one node
pub struct HealthMonitor {
    store: Arc<dyn CoordinationStore>,
    started_at: Instant,
    live: AtomicBool,
    ready: AtomicBool,
}

impl HealthMonitor {
    /// Create a monitor; the node starts live but not ready
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            started_at: Instant::now(),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Probe the coordination store
    pub async fn check_store(&self) -> HealthCheckResult {
        let started = Instant::now();
        let backend = self.store.backend_name();
        match self.store.ping().await {
            Ok(()) => HealthCheckResult::new(
                "coordination_store",
                HealthStatus::Healthy,
                Some(backend.to_string()),
                started.elapsed(),
            ),
            Err(e) => {
                debug!(backend, error = %e, "Store probe failed");
                HealthCheckResult::new(
                    "coordination_store",
                    HealthStatus::Degraded,
                    Some(format!("standalone mode: {}", e)),
                    started.elapsed(),
                )
            }
        }
    }

    /// Run every check
    pub async fn report(&self) -> HealthReport {
        let flag = |name: &str, ok: bool| {
            let status = if ok {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            };
            HealthCheckResult::new(name, status, None, Duration::ZERO)
        };

        let checks = vec![
            flag("liveness", self.is_live()),
            flag("readiness", self.is_ready()),
            self.check_store().await,
        ];
        HealthReport::new(checks, self.uptime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_ready_node_is_healthy() {
        let store = Arc::new(InMemoryStore::new());
        let monitor = HealthMonitor::new(store);
        monitor.set_ready(true);

        let report = monitor.report().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.checks.len(), 3);
    }

    #[tokio::test]
    async fn test_store_outage_degrades() {
        let store = Arc::new(InMemoryStore::new());
        let monitor = HealthMonitor::new(store.clone());
        monitor.set_ready(true);
        store.set_available(false);

        let report = monitor.report().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.status.is_operational());
    }

    #[tokio::test]
    async fn test_not_ready_is_unhealthy() {
        let monitor = HealthMonitor::new(Arc::new(InMemoryStore::new()));
        let report = monitor.report().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }
}
