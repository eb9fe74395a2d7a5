//! Coordination Store Client
//!
//! Thin contract over the shared key-value store every process talks to.
//!
//! # Design
//!
//! - Async trait so networked backends can be plugged in
//! - Every key lives in a [`Namespace`] so unrelated subsystems never collide
//! - Counter mutations are single atomic operations; callers never
//!   read-modify-write across the network

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

pub use memory::{InMemoryStore, StoreStats};

/// Key namespace inside the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Shared translations, never expire
    Permanent,
    /// Per-user translations with bounded TTL
    Bypass,
    /// Work-in-progress translations
    Partial,
    /// Distributed "someone is computing this" markers
    InFlight,
    /// Per-user in-flight translation counters
    Concurrency,
    /// Credential error counters
    KeyHealth,
    /// Round-robin credential counters
    Rotation,
    /// Refresh locks and published refresh timestamps
    Leader,
}

impl Namespace {
    /// Key prefix used by the backend.
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Permanent => "translation",
            Namespace::Bypass => "translation_bypass",
            Namespace::Partial => "translation_partial",
            Namespace::InFlight => "translation_inflight",
            Namespace::Concurrency => "user_concurrency",
            Namespace::KeyHealth => "key_health",
            Namespace::Rotation => "key_rotation",
            Namespace::Leader => "leader",
        }
    }

    /// Fully-qualified backend key.
    pub fn qualify(&self, key: &str) -> String {
        format!("{}:{}", self.prefix(), key)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Shared key-value store contract.
///
/// Implementations must make `increment`, `decrement_floor_zero` and
/// `set_if_not_exists` atomic per key (a server-side script for networked
/// stores). Counters are stored as decimal text, the way Redis stores them.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Get a value
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Bytes>>;

    /// Set a value, optionally expiring after `ttl`
    async fn set(&self, ns: Namespace, key: &str, value: Bytes, ttl: Option<Duration>)
        -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool>;

    /// Atomically increment a counter (missing counts as 0).
    ///
    /// When `ttl` is given the expiry is refreshed in the same step.
    async fn increment(&self, ns: Namespace, key: &str, ttl: Option<Duration>) -> Result<i64>;

    /// Atomically decrement a counter without ever going below zero.
    ///
    /// Returns the value after the operation. A missing counter stays missing
    /// and reports 0.
    async fn decrement_floor_zero(&self, ns: Namespace, key: &str) -> Result<i64>;

    /// Write `value` only if the key does not exist; returns whether it was written
    async fn set_if_not_exists(
        &self,
        ns: Namespace,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool>;

    /// Connectivity probe
    async fn ping(&self) -> Result<()>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Parse a counter value stored as decimal text.
pub fn parse_counter(op: &'static str, raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| Error::StoreProtocol {
            op,
            reason: format!("value is not an integer counter ({} bytes)", raw.len()),
        })
}

/// Read a counter, treating a missing key as zero.
pub async fn read_counter(store: &dyn CoordinationStore, ns: Namespace, key: &str) -> Result<i64> {
    match store.get(ns, key).await? {
        Some(raw) => parse_counter("read_counter", &raw),
        None => Ok(0),
    }
}
