//! Three-Tier Translation Cache
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          TieredCache                            │
//! ├─────────────────────┬─────────────────────┬─────────────────────┤
//! │ Permanent (shared)  │ Bypass (per user)   │ Partial (progress)  │
//! │ TTL 0               │ TTL <= 12h          │ TTL minutes         │
//! │ any config          │ config_hash scoped  │ same scoped key     │
//! └─────────────────────┴─────────────────────┴─────────────────────┘
//!                              │
//!                     CoordinationStore
//! ```
//!
//! Committed results go to exactly one tier, chosen by the key scope.
//! Partial entries are disposable and never promoted.

mod entry;
mod manager;

pub use entry::{CacheEntry, PartialEntry, Resolved};
pub use manager::{CacheTier, TierConfig, TieredCache, DEFAULT_PARTIAL_TTL, MAX_BYPASS_TTL};
