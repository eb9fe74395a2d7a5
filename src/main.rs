//! Subcache Node
//!
//! Runs one coordinator process: health and metrics endpoints, expired-key
//! sweeping, and a leader-elected refresh of the provider credential list
//! that workers draw rotated credentials from via `/keys/next`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         subcache node                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Health     │    │ Translation  │    │  Credential  │       │
//! │  │   /healthz   │───▶│ Coordinator  │◀───│   refresh    │       │
//! │  │   /metrics   │    │              │    │  (leader)    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subcache::coordination::RefreshJob;
use subcache::error::{Error, Result};
use subcache::keys::credential_fingerprint;
use subcache::{CoordinatorConfig, InMemoryStore, TranslationCoordinator};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Subcache - distributed translation cache and coordination node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Maximum in-flight handles in the local dedup table
    #[arg(long, env = "DEDUP_MAX_ENTRIES", default_value = "500")]
    dedup_max_entries: usize,

    /// Maximum age of an in-flight handle in seconds
    #[arg(long, env = "DEDUP_TTL_SECONDS", default_value = "180")]
    dedup_ttl_seconds: u64,

    /// Bypass-tier TTL in hours (at most 12)
    #[arg(long, env = "BYPASS_TTL_HOURS", default_value = "12")]
    bypass_ttl_hours: u64,

    /// Partial-tier TTL in minutes
    #[arg(long, env = "PARTIAL_TTL_MINUTES", default_value = "10")]
    partial_ttl_minutes: u64,

    /// Repeat-load window in seconds
    #[arg(long, env = "GATE_WINDOW_SECONDS", default_value = "5")]
    gate_window_seconds: u64,

    /// Loads inside the window that trigger a purge check
    #[arg(long, env = "GATE_THRESHOLD", default_value = "3")]
    gate_threshold: usize,

    /// Concurrent translations allowed per user
    #[arg(long, env = "CONCURRENCY_LIMIT", default_value = "3")]
    concurrency_limit: u32,

    /// Credential errors before cooldown
    #[arg(long, env = "KEY_ERROR_THRESHOLD", default_value = "5")]
    key_error_threshold: u32,

    /// Credential cooldown window in minutes
    #[arg(long, env = "KEY_COOLDOWN_MINUTES", default_value = "60")]
    key_cooldown_minutes: u64,

    /// File with one provider credential per line, refreshed under leader election
    #[arg(long, env = "PROVIDER_KEYS_FILE")]
    provider_keys_file: Option<PathBuf>,

    /// Provider the credential list belongs to (rotation and health scope)
    #[arg(long, env = "PROVIDER_ID", default_value = "default")]
    provider_id: String,

    /// Credential refresh interval in seconds
    #[arg(long, env = "REFRESH_INTERVAL_SECONDS", default_value = "3600")]
    refresh_interval_seconds: u64,

    /// Expired-key sweep interval in seconds
    #[arg(long, env = "SWEEP_INTERVAL_SECONDS", default_value = "60")]
    sweep_interval_seconds: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn coordinator_config(&self) -> CoordinatorConfig {
        let mut config =
            CoordinatorConfig::default().with_concurrency_limit(self.concurrency_limit);
        config.dedup.max_entries = self.dedup_max_entries;
        config.dedup.handle_ttl = Duration::from_secs(self.dedup_ttl_seconds);
        config.tiers.bypass_ttl = Duration::from_secs(self.bypass_ttl_hours * 60 * 60);
        config.tiers.partial_ttl = Duration::from_secs(self.partial_ttl_minutes * 60);
        config.gate.window = Duration::from_secs(self.gate_window_seconds);
        config.gate.threshold = self.gate_threshold;
        config.key_health.error_threshold = self.key_error_threshold;
        config.key_health.cooldown_window = Duration::from_secs(self.key_cooldown_minutes * 60);
        config
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting subcache node");
    info!("  Concurrency limit: {}", args.concurrency_limit);
    info!("  Bypass TTL: {} hours", args.bypass_ttl_hours);
    info!(
        "  Repeat-load gate: {} loads / {}s",
        args.gate_threshold, args.gate_window_seconds
    );

    let config = args.coordinator_config();
    config.validate()?;

    let store = Arc::new(InMemoryStore::new());
    let coordinator = Arc::new(TranslationCoordinator::new(store.clone(), config));
    let cancel = CancellationToken::new();

    // Sweep expired keys
    let sweep_store = store.clone();
    let sweep_cancel = cancel.clone();
    let sweep_interval = Duration::from_secs(args.sweep_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = sweep_store.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired keys");
                    }
                }
            }
        }
    });

    // Leader-elected credential refresh
    let provider_keys = Arc::new(RwLock::new(Vec::new()));
    if let Some(path) = args.provider_keys_file.clone() {
        let job = Arc::new(ProviderKeysJob::new(path, provider_keys.clone()));
        let refresher = coordinator.refresh_coordinator("provider_keys", job);
        let interval = Duration::from_secs(args.refresh_interval_seconds.max(1));
        let refresh_cancel = cancel.clone();
        tokio::spawn(async move {
            refresher.run(interval, refresh_cancel).await;
        });
    } else {
        info!("No provider keys file configured, credential refresh disabled");
    }

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_state = Arc::new(NodeState {
        coordinator: coordinator.clone(),
        provider_id: args.provider_id.clone(),
        provider_keys,
    });
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_state).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_coordinator = coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_coordinator).await {
            error!("Metrics server error: {}", e);
        }
    });

    coordinator.health_monitor().set_ready(true);
    info!("Node ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    coordinator.health_monitor().set_ready(false);
    cancel.cancel();

    info!("Node shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Provider Keys Refresh
// =============================================================================

type ProviderKeys = Arc<RwLock<Vec<String>>>;

/// Loads provider credentials from a file shared by all nodes
struct ProviderKeysJob {
    path: PathBuf,
    keys: ProviderKeys,
}

impl ProviderKeysJob {
    fn new(path: PathBuf, keys: ProviderKeys) -> Self {
        Self { path, keys }
    }

    async fn load(&self) -> anyhow::Result<usize> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let keys: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        if keys.is_empty() {
            anyhow::bail!("no credentials in {}", self.path.display());
        }
        let count = keys.len();
        *self.keys.write() = keys;
        Ok(count)
    }
}

#[async_trait]
impl RefreshJob for ProviderKeysJob {
    async fn refresh(&self) -> anyhow::Result<()> {
        let count = self.load().await?;
        info!(count, "Provider credentials refreshed");
        Ok(())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        let count = self.load().await?;
        info!(count, "Provider credentials reloaded");
        Ok(())
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// What the health server reads
struct NodeState {
    coordinator: Arc<TranslationCoordinator>,
    provider_id: String,
    provider_keys: ProviderKeys,
}

impl NodeState {
    fn keys(&self) -> Vec<String> {
        self.provider_keys.read().clone()
    }

    /// Credential counts, without advancing the rotation
    async fn key_summary(&self) -> serde_json::Value {
        let keys = self.keys();
        let mut healthy = 0;
        for key in &keys {
            if self.coordinator.is_provider_healthy(key).await {
                healthy += 1;
            }
        }
        serde_json::json!({
            "provider": self.provider_id,
            "total": keys.len(),
            "healthy": healthy,
        })
    }

    /// Next rotated credential as its line index and fingerprint
    async fn next_key(&self) -> Option<serde_json::Value> {
        let keys = self.keys();
        let key = self
            .coordinator
            .next_rotated_key(&self.provider_id, &keys)
            .await?;
        let index = keys.iter().position(|k| *k == key)?;
        Some(serde_json::json!({
            "provider": self.provider_id,
            "index": index,
            "fingerprint": credential_fingerprint(&key),
        }))
    }
}

fn respond_json(status: hyper::StatusCode, value: &serde_json::Value) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => respond(
            hyper::StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            e.to_string(),
        ),
    }
}

type Response = hyper::Response<http_body_util::Full<bytes::Bytes>>;

fn respond(
    status: hyper::StatusCode,
    content_type: &'static str,
    body: impl Into<bytes::Bytes>,
) -> Response {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}

async fn run_health_server(addr: &str, state: Arc<NodeState>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
        state: Arc<NodeState>,
    ) -> std::result::Result<Response, std::convert::Infallible> {
        let coordinator = &state.coordinator;
        let monitor = coordinator.health_monitor();
        let response = match req.uri().path() {
            "/livez" if monitor.is_live() => respond(StatusCode::OK, "text/plain", "ok"),
            "/readyz" if monitor.is_ready() => respond(StatusCode::OK, "text/plain", "ok"),
            "/livez" | "/readyz" => {
                respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "not ready")
            }
            "/healthz" => {
                let report = coordinator.health().await;
                let status = if report.status.is_operational() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                match serde_json::to_vec(&report) {
                    Ok(body) => respond(status, "application/json", body),
                    Err(e) => respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        e.to_string(),
                    ),
                }
            }
            "/keys" => respond_json(StatusCode::OK, &state.key_summary().await),
            "/keys/next" => match state.next_key().await {
                Some(next) => respond_json(StatusCode::OK, &next),
                None => respond(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "text/plain",
                    "no usable credential",
                ),
            },
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, coordinator: Arc<TranslationCoordinator>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, Gauge, Registry, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    struct Exporter {
        registry: Registry,
        gauges: Vec<Gauge>,
        coordinator: Arc<TranslationCoordinator>,
    }

    impl Exporter {
        fn encode(&self) -> std::result::Result<Vec<u8>, prometheus::Error> {
            let snapshot = self.coordinator.metrics();
            for (gauge, (_, _, value)) in self.gauges.iter().zip(snapshot.gauges()) {
                gauge.set(value);
            }
            let mut buffer = Vec::new();
            TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
            Ok(buffer)
        }
    }

    // Register one gauge per snapshot field
    let registry = Registry::new();
    let mut gauges = Vec::new();
    for (name, help, _) in coordinator.metrics().gauges() {
        let gauge = Gauge::new(name, help)
            .map_err(|e| Error::Internal(format!("Invalid metric {}: {}", name, e)))?;
        registry
            .register(Box::new(gauge.clone()))
            .map_err(|e| Error::Internal(format!("Failed to register {}: {}", name, e)))?;
        gauges.push(gauge);
    }
    let exporter = Arc::new(Exporter {
        registry,
        gauges,
        coordinator,
    });

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
        exporter: Arc<Exporter>,
    ) -> std::result::Result<Response, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match exporter.encode() {
                Ok(buffer) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, buffer),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string(),
                ),
            },
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let exporter = exporter.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(req, exporter.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!("Metrics server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_keys_file(contents: &str) -> (Arc<NodeState>, ProviderKeysJob, PathBuf) {
        let path = std::env::temp_dir().join(format!("subcache-keys-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();

        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(TranslationCoordinator::new(
            store,
            CoordinatorConfig::default(),
        ));
        let provider_keys: ProviderKeys = Arc::new(RwLock::new(Vec::new()));
        let job = ProviderKeysJob::new(path.clone(), provider_keys.clone());
        let state = Arc::new(NodeState {
            coordinator,
            provider_id: "gemini".to_string(),
            provider_keys,
        });
        (state, job, path)
    }

    #[tokio::test]
    async fn test_refreshed_keys_feed_rotation() {
        let (state, job, path) = node_with_keys_file("# primary\nsk-a\n\nsk-b\n");
        assert!(state.next_key().await.is_none());

        job.refresh().await.unwrap();
        assert_eq!(state.keys(), vec!["sk-a".to_string(), "sk-b".to_string()]);

        let indices: Vec<u64> = [
            state.next_key().await.unwrap(),
            state.next_key().await.unwrap(),
            state.next_key().await.unwrap(),
        ]
        .iter()
        .map(|next| next["index"].as_u64().unwrap())
        .collect();
        assert_eq!(indices, vec![0, 1, 0]);

        let next = state.next_key().await.unwrap();
        assert_eq!(next["fingerprint"], credential_fingerprint("sk-b"));
        assert_ne!(next["fingerprint"], "sk-b");

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_key_summary_counts_cooling_keys() {
        let (state, job, path) = node_with_keys_file("sk-a\nsk-b\nsk-c\n");
        job.reload().await.unwrap();

        for _ in 0..5 {
            state.coordinator.record_provider_error("sk-b").await.unwrap();
        }
        let summary = state.key_summary().await;
        assert_eq!(summary["total"], 3);
        assert_eq!(summary["healthy"], 2);

        for _ in 0..4 {
            let next = state.next_key().await.unwrap();
            assert_ne!(next["index"], 1);
        }

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_empty_keys_file_is_rejected() {
        let (state, job, path) = node_with_keys_file("# nothing yet\n");
        assert!(job.refresh().await.is_err());
        assert!(state.keys().is_empty());
        std::fs::remove_file(path).unwrap();
    }
}
