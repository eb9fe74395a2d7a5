//! Distributed Coordination Primitives
//!
//! State shared by every process through the coordination store:
//!
//! - [`TranslationStatus`]: local in-progress counts plus token-owned in-flight markers
//! - [`ConcurrencyLimiter`]: per-user counter of running translations
//! - [`KeyHealthTracker`]: credential circuit breaker
//! - [`RotationCounter`]: round-robin credential selection
//! - [`LeaderElection`] / [`RefreshCoordinator`]: single-leader periodic refresh
//!
//! Every primitive degrades to a permissive default when the store is
//! unreachable, so a process keeps serving in standalone mode.

pub mod key_health;
pub mod leader;
pub mod limiter;
pub mod rotation;
pub mod status;

pub use key_health::{HealthRecord, KeyHealthConfig, KeyHealthTracker};
pub use leader::{
    run_with_leader_election, LeaderConfig, LeaderElection, LockOutcome, RefreshCoordinator,
    RefreshJob, RefreshOutcome,
};
pub use limiter::{ConcurrencyLimiter, LimiterConfig};
pub use rotation::RotationCounter;
pub use status::{InFlightToken, TranslationStatus};
