//! Coordination Metrics
//!
//! Lock-free counters for cache, dedup, gate and limiter activity.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics collector shared by every component of one coordinator
#[derive(Debug, Default)]
pub struct CoordinationMetrics {
    // Cache tiers
    permanent_hits: AtomicU64,
    bypass_hits: AtomicU64,
    partial_hits: AtomicU64,
    misses: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    purges: AtomicU64,

    // Delegated work
    computations: AtomicU64,
    work_failures: AtomicU64,

    // Safety gate
    gate_triggers: AtomicU64,
    gate_blocks: AtomicU64,

    // Limiter
    limit_rejections: AtomicU64,

    // Store outages absorbed by a permissive default
    store_errors: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $get:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl CoordinationMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_permanent_hit, permanent_hits, permanent_hits);
    counter!(record_bypass_hit, bypass_hits, bypass_hits);
    counter!(record_partial_hit, partial_hits, partial_hits);
    counter!(record_miss, misses, misses);
    counter!(record_commit, commits, commits);
    counter!(record_commit_failure, commit_failures, commit_failures);
    counter!(record_purge, purges, purges);
    counter!(record_computation, computations, computations);
    counter!(record_work_failure, work_failures, work_failures);
    counter!(record_gate_trigger, gate_triggers, gate_triggers);
    counter!(record_gate_block, gate_blocks, gate_blocks);
    counter!(record_limit_rejection, limit_rejections, limit_rejections);
    counter!(record_store_error, store_errors, store_errors);

    /// Complete-entry hit ratio over all lookups
    pub fn hit_ratio(&self) -> f64 {
        let hits = (self.permanent_hits() + self.bypass_hits()) as f64;
        let total = hits + self.partial_hits() as f64 + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            permanent_hits: self.permanent_hits(),
            bypass_hits: self.bypass_hits(),
            partial_hits: self.partial_hits(),
            misses: self.misses(),
            commits: self.commits(),
            commit_failures: self.commit_failures(),
            purges: self.purges(),
            computations: self.computations(),
            dedup_joins: 0,
            work_failures: self.work_failures(),
            gate_triggers: self.gate_triggers(),
            gate_blocks: self.gate_blocks(),
            limit_rejections: self.limit_rejections(),
            store_errors: self.store_errors(),
            hit_ratio: self.hit_ratio(),
            in_flight: 0,
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub permanent_hits: u64,
    pub bypass_hits: u64,
    pub partial_hits: u64,
    pub misses: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub purges: u64,
    pub computations: u64,
    /// Requests joined onto in-flight work, filled from the deduplicator
    pub dedup_joins: u64,
    pub work_failures: u64,
    pub gate_triggers: u64,
    pub gate_blocks: u64,
    pub limit_rejections: u64,
    pub store_errors: u64,
    pub hit_ratio: f64,
    /// Handles currently in the local dedup table
    pub in_flight: u64,
}

impl MetricsSnapshot {
    /// Flatten into `(name, help, value)` triples for exposition.
    pub fn gauges(&self) -> Vec<(&'static str, &'static str, f64)> {
        vec![
            ("subcache_permanent_hits", "Shared tier hits", self.permanent_hits as f64),
            ("subcache_bypass_hits", "Bypass tier hits", self.bypass_hits as f64),
            ("subcache_partial_hits", "Partial results served", self.partial_hits as f64),
            ("subcache_misses", "Cache misses", self.misses as f64),
            ("subcache_commits", "Results committed", self.commits as f64),
            ("subcache_commit_failures", "Failed commits", self.commit_failures as f64),
            ("subcache_purges", "Entries purged by the repeat-load gate", self.purges as f64),
            ("subcache_computations", "Delegated work executions", self.computations as f64),
            ("subcache_dedup_joins", "Requests joined onto in-flight work", self.dedup_joins as f64),
            ("subcache_work_failures", "Delegated work failures", self.work_failures as f64),
            ("subcache_gate_triggers", "Repeat-load bursts detected", self.gate_triggers as f64),
            ("subcache_gate_blocks", "Purges blocked by the safety check", self.gate_blocks as f64),
            ("subcache_limit_rejections", "Concurrency limit rejections", self.limit_rejections as f64),
            ("subcache_store_errors", "Store errors absorbed", self.store_errors as f64),
            ("subcache_hit_ratio", "Complete-entry hit ratio", self.hit_ratio),
            ("subcache_in_flight", "Local in-flight computations", self.in_flight as f64),
        ]
    }
}
