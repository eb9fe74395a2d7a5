//! Cache Entry Types
//!
//! Complete and partial translation records as stored in the coordination store.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Committed translation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Translated subtitle content
    pub content: String,
    /// Commit time
    pub created_at: DateTime<Utc>,
    /// TTL in seconds (0 = never expires)
    pub ttl_seconds: u64,
}

impl CacheEntry {
    /// Create an entry stamped now
    pub fn new(content: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            content: content.into(),
            created_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// Shared-tier entries never expire
    #[inline]
    pub fn is_permanent(&self) -> bool {
        self.ttl_seconds == 0
    }

    /// Check if entry has expired
    pub fn is_expired(&self) -> bool {
        expired(self.created_at, self.ttl_seconds)
    }
}

/// Work-in-progress translation.
///
/// A separate type from [`CacheEntry`] so progress can never be committed
/// by accident: the only way into a cache tier is an explicit commit of a
/// complete result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialEntry {
    /// Content translated so far
    pub content: String,
    /// Time of the latest progress write
    pub created_at: DateTime<Utc>,
    /// Short TTL in seconds, always non-zero
    pub ttl_seconds: u64,
}

impl PartialEntry {
    /// Create a partial entry stamped now. A zero TTL is bumped to one second.
    pub fn new(content: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            content: content.into(),
            created_at: Utc::now(),
            ttl_seconds: ttl_seconds.max(1),
        }
    }

    /// Check if entry has expired
    pub fn is_expired(&self) -> bool {
        expired(self.created_at, self.ttl_seconds)
    }
}

// A TTL too large to represent is treated as expired, so a corrupt record
// reads as a miss like any other unreadable one.
fn expired(created_at: DateTime<Utc>, ttl_seconds: u64) -> bool {
    if ttl_seconds == 0 {
        return false;
    }
    let expires_at = i64::try_from(ttl_seconds)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|ttl| created_at.checked_add_signed(ttl));
    match expires_at {
        Some(expires_at) => Utc::now() > expires_at,
        None => true,
    }
}

/// Result of resolving a key against the tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A committed entry from the key's tier
    Complete(CacheEntry),
    /// Live progress of an in-flight computation
    Partial(PartialEntry),
    /// Nothing cached
    Absent,
}

impl Resolved {
    /// Is there a committed entry
    pub fn is_complete(&self) -> bool {
        matches!(self, Resolved::Complete(_))
    }

    /// Is there nothing at all
    pub fn is_absent(&self) -> bool {
        matches!(self, Resolved::Absent)
    }
}
