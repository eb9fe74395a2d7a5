//! Subcache - Distributed Translation Cache & Coordination Layer
//!
//! Answers, for every (item, target language, user configuration) request of a
//! subtitle translation service: is it cached, is it being computed right
//! now, or must it be computed? Correct within one process and across a
//! fleet of stateless processes sharing one key-value store.
//!
//! # Architecture
//!
//! ```text
//! request ─▶ Deduplicator ─▶ TieredCache ─▶ (miss) ─▶ ConcurrencyLimiter
//!                                                       │
//!                                   TranslationStatus ◀─┴─▶ delegated work
//!
//! load event ─▶ RepeatLoadGate ─▶ purge (only when safe)
//!
//! credentials ─▶ RotationCounter + KeyHealthTracker
//! periodic refresh ─▶ LeaderElection / RefreshCoordinator
//!
//!             all distributed state ─▶ CoordinationStore
//! ```
//!
//! # Modules
//!
//! - [`store`] - Coordination store contract and in-memory backend
//! - [`keys`] - Cache keys, configuration hashing, fingerprints
//! - [`cache`] - Three-tier cache (permanent, bypass, partial)
//! - [`dedup`] - In-process single-flight deduplicator
//! - [`coordination`] - Status, limiter, key health, rotation, leader election
//! - [`gate`] - Repeat-load safety gate
//! - [`service`] - [`TranslationCoordinator`] facade
//! - [`health`] - Liveness and readiness
//! - [`metrics`] - Counters and snapshots
//! - [`config`] - Configuration
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod coordination;
pub mod dedup;
pub mod error;
pub mod gate;
pub mod health;
pub mod keys;
pub mod metrics;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheEntry, PartialEntry, Resolved, TieredCache};
pub use config::CoordinatorConfig;
pub use coordination::{
    ConcurrencyLimiter, KeyHealthTracker, LeaderElection, LockOutcome, RefreshCoordinator,
    RefreshJob, RefreshOutcome, RotationCounter,
};
pub use dedup::Deduplicator;
pub use error::{ComputeError, Error, Result, WorkError};
pub use gate::{GateDecision, LoadEvent, RepeatLoadGate};
pub use keys::{config_hash, CacheKey, Scope};
pub use service::{Outcome, PartialWriter, TranslationCoordinator, TranslationRequest};
pub use store::{CoordinationStore, InMemoryStore, Namespace};
