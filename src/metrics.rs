// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for tiered-cache.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The embedding
//! process chooses the exporter (Prometheus, OTEL, logging recorder).
//!
//! # Metric Naming Convention
//! - `tiered_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: local, remote
//! - `operation`: get, set, delete, clear, multi_get, multi_set, scan
//! - `status`: hit, miss, success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one tier operation.
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "tiered_cache_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency.
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "tiered_cache_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a store-level failure that was absorbed (degrade-to-miss path).
pub fn record_store_error(tier: &str, operation: &str) {
    counter!(
        "tiered_cache_store_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record capacity evictions from the local tier.
pub fn record_evictions(cache: &str, count: usize) {
    counter!(
        "tiered_cache_evictions_total",
        "cache" => cache.to_string()
    )
    .increment(count as u64);
}

/// Record entries removed by the background expiry sweep.
pub fn record_expired(cache: &str, count: usize) {
    counter!(
        "tiered_cache_expired_total",
        "cache" => cache.to_string()
    )
    .increment(count as u64);
}

/// Set current entry count of the local tier.
pub fn set_local_entries(cache: &str, count: usize) {
    gauge!(
        "tiered_cache_local_entries",
        "cache" => cache.to_string()
    )
    .set(count as f64);
}

/// Record a mutation event dropped by the version gate.
pub fn record_stale_event(manager: &str) {
    counter!(
        "tiered_cache_stale_events_total",
        "manager" => manager.to_string()
    )
    .increment(1);
}

/// Record an accepted mutation event.
pub fn record_applied_event(manager: &str, event_type: &str) {
    counter!(
        "tiered_cache_applied_events_total",
        "manager" => manager.to_string(),
        "event_type" => event_type.to_string()
    )
    .increment(1);
}

/// Record one reconciliation pass: keys copied remote -> local.
pub fn record_reconciliation(manager: &str, synced: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "tiered_cache_reconciliations_total",
        "manager" => manager.to_string(),
        "status" => status
    )
    .increment(1);
    if success {
        counter!(
            "tiered_cache_reconciled_keys_total",
            "manager" => manager.to_string()
        )
        .increment(synced as u64);
    }
}

/// Record a distributed lock acquisition attempt outcome.
pub fn record_lock(outcome: &str) {
    counter!(
        "tiered_cache_lock_acquisitions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop.
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}
