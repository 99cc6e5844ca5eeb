//! Structured logging helpers and counters (spec §4.15).
//!
//! Logging itself is just `tracing` calls at call sites, in the teacher's
//! style (`tracing::info!(component = ..., operation = ..., ...)`). This
//! module only holds the cross-cutting pieces: counters and the per-request
//! timing breakdown returned in debug info.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide call/error/timeout/cache-hit counters. One instance lives on
/// the background worker context (`rpc::Worker`) alongside the engine handle
/// and cache tiers, per spec §5 "process-wide state".
#[derive(Default)]
pub struct Metrics {
    calls: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    cache_hits_memory: AtomicU64,
    cache_hits_persistent: AtomicU64,
    cache_hits_database: AtomicU64,
    cache_misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub cache_hits_memory: u64,
    pub cache_hits_persistent: u64,
    pub cache_hits_database: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Memory,
    Persistent,
    Database,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self, tier: CacheTier) {
        match tier {
            CacheTier::Memory => self.cache_hits_memory.fetch_add(1, Ordering::Relaxed),
            CacheTier::Persistent => self.cache_hits_persistent.fetch_add(1, Ordering::Relaxed),
            CacheTier::Database => self.cache_hits_database.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cache_hits_memory: self.cache_hits_memory.load(Ordering::Relaxed),
            cache_hits_persistent: self.cache_hits_persistent.load(Ordering::Relaxed),
            cache_hits_database: self.cache_hits_database.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// Per-request timing breakdown (analysis, planning, each branch, fusion,
/// total), returned as `debug_info` when a search request asks for it.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TimingBreakdown {
    pub analysis_ms: f64,
    pub planning_ms: f64,
    pub fts_branch_ms: Option<f64>,
    pub vector_branch_ms: Option<f64>,
    pub like_branch_ms: Option<f64>,
    pub fusion_ms: f64,
    pub total_ms: f64,
}

/// Small stopwatch wrapper so call sites read `let _t = Timer::start(); ...
/// let ms = _t.elapsed_ms();` instead of juggling `Instant` directly.
pub struct Timer(Instant);

impl Timer {
    pub fn start() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.0.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_recorded_events() {
        let m = Metrics::new();
        m.record_call();
        m.record_call();
        m.record_error();
        m.record_timeout();
        m.record_cache_hit(CacheTier::Memory);
        m.record_cache_hit(CacheTier::Database);
        m.record_cache_miss();

        let snap = m.snapshot();
        assert_eq!(snap.calls, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.cache_hits_memory, 1);
        assert_eq!(snap.cache_hits_database, 1);
        assert_eq!(snap.cache_misses, 1);
    }

    #[test]
    fn timer_reports_nonnegative_elapsed() {
        let t = Timer::start();
        assert!(t.elapsed_ms() >= 0.0);
    }
}
