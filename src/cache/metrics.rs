//! Cache Metrics Collection
//!
//! Lock-free counters updated on the hot path, plus Prometheus text
//! exposition built from a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use super::validator::DecisionKind;
use crate::error::{Error, Result};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookups
    hits: AtomicU64,
    misses: AtomicU64,

    // Fetch path
    served_from_cache: AtomicU64,
    served_from_network: AtomicU64,
    alternatives_served: AtomicU64,
    inconsistent_revalidations: AtomicU64,

    // Decisions
    keeps: AtomicU64,
    attaches: AtomicU64,
    clears: AtomicU64,
    replaces: AtomicU64,
    evictions: AtomicU64,
    entries: AtomicU64,

    // Durability
    persisted_ops: AtomicU64,
    persistence_failures: AtomicU64,
    flushes: AtomicU64,
    flush_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_served(&self, from_cache: bool, alternative: bool) {
        if from_cache {
            self.served_from_cache.fetch_add(1, Ordering::Relaxed);
        } else {
            self.served_from_network.fetch_add(1, Ordering::Relaxed);
        }
        if alternative {
            self.alternatives_served.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_inconsistent_revalidation(&self) {
        self.inconsistent_revalidations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, kind: DecisionKind) {
        let counter = match kind {
            DecisionKind::Keep => &self.keeps,
            DecisionKind::AttachAlternative => &self.attaches,
            DecisionKind::ClearAlternative => &self.clears,
            DecisionKind::Replace => &self.replaces,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_entries(&self, entries: u64) {
        self.entries.store(entries, Ordering::Relaxed);
    }

    pub fn record_persisted(&self) {
        self.persisted_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, duration: Duration) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(&self.flush_latency_us, duration);
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            served_from_cache: self.served_from_cache.load(Ordering::Relaxed),
            served_from_network: self.served_from_network.load(Ordering::Relaxed),
            alternatives_served: self.alternatives_served.load(Ordering::Relaxed),
            inconsistent_revalidations: self.inconsistent_revalidations.load(Ordering::Relaxed),
            keeps: self.keeps.load(Ordering::Relaxed),
            attaches: self.attaches.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            replaces: self.replaces.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            persisted_ops: self.persisted_ops.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_latency: Duration::from_micros(self.flush_latency_us.load(Ordering::Relaxed)),
        }
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String> {
        self.snapshot().encode_text()
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Lookups
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,

    // Fetch path
    pub served_from_cache: u64,
    pub served_from_network: u64,
    pub alternatives_served: u64,
    pub inconsistent_revalidations: u64,

    // Decisions
    pub keeps: u64,
    pub attaches: u64,
    pub clears: u64,
    pub replaces: u64,
    pub evictions: u64,
    pub entries: u64,

    // Durability
    pub persisted_ops: u64,
    pub persistence_failures: u64,
    pub flushes: u64,
    pub flush_latency: Duration,
}

impl MetricsSnapshot {
    /// Render the snapshot in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let registry = Registry::new_custom(Some("entrystor".to_string()), None).map_err(prom)?;

        let counter = |name: &str, help: &str, value: u64| -> Result<()> {
            let c = IntCounter::new(name, help).map_err(prom)?;
            c.inc_by(value);
            registry.register(Box::new(c)).map_err(prom)
        };
        counter("lookup_hits_total", "Lookups that found an entry", self.hits)?;
        counter("lookup_misses_total", "Lookups that found nothing", self.misses)?;
        counter(
            "evictions_total",
            "Entries removed from the store",
            self.evictions,
        )?;
        counter(
            "inconsistent_revalidations_total",
            "Not-modified answers received for uncached keys",
            self.inconsistent_revalidations,
        )?;
        counter(
            "persisted_ops_total",
            "Persistence operations committed",
            self.persisted_ops,
        )?;
        counter(
            "persistence_failures_total",
            "Persistence operations that failed",
            self.persistence_failures,
        )?;
        counter("flushes_total", "Completed flush barriers", self.flushes)?;

        let served = IntCounterVec::new(
            Opts::new("responses_total", "Fetch responses by body source"),
            &["source"],
        )
        .map_err(prom)?;
        served
            .with_label_values(&["cache"])
            .inc_by(self.served_from_cache);
        served
            .with_label_values(&["network"])
            .inc_by(self.served_from_network);
        served
            .with_label_values(&["alternative"])
            .inc_by(self.alternatives_served);
        registry.register(Box::new(served)).map_err(prom)?;

        let decisions = IntCounterVec::new(
            Opts::new("decisions_total", "Reconciliation decisions by kind"),
            &["kind"],
        )
        .map_err(prom)?;
        for (kind, value) in [
            (DecisionKind::Keep, self.keeps),
            (DecisionKind::AttachAlternative, self.attaches),
            (DecisionKind::ClearAlternative, self.clears),
            (DecisionKind::Replace, self.replaces),
        ] {
            decisions.with_label_values(&[kind.as_str()]).inc_by(value);
        }
        registry.register(Box::new(decisions)).map_err(prom)?;

        let entries = IntGauge::new("entries", "Entries currently stored").map_err(prom)?;
        entries.set(self.entries as i64);
        registry.register(Box::new(entries)).map_err(prom)?;

        let latency = Gauge::new(
            "flush_latency_seconds",
            "Smoothed flush barrier latency",
        )
        .map_err(prom)?;
        latency.set(self.flush_latency.as_secs_f64());
        registry.register(Box::new(latency)).map_err(prom)?;

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&registry.gather(), &mut buffer)
            .map_err(prom)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn prom(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics encoding failed: {}", e))
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.hit_ratio(), 0.0);
    }

    #[test]
    fn test_hit_tracking() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        assert_eq!(metrics.hits(), 3);
        assert!((metrics.hit_ratio() - 0.75).abs() < 0.001);
    }

    #[test]
    fn test_decision_tracking() {
        let metrics = CacheMetrics::new();
        metrics.record_decision(DecisionKind::Replace);
        metrics.record_decision(DecisionKind::Keep);
        metrics.record_decision(DecisionKind::Keep);
        metrics.record_decision(DecisionKind::AttachAlternative);

        let snap = metrics.snapshot();
        assert_eq!(snap.replaces, 1);
        assert_eq!(snap.keeps, 2);
        assert_eq!(snap.attaches, 1);
        assert_eq!(snap.clears, 0);
    }

    #[test]
    fn test_flush_latency() {
        let metrics = CacheMetrics::new();
        metrics.record_flush(Duration::from_micros(100));
        let snap = metrics.snapshot();
        assert_eq!(snap.flushes, 1);
        assert_eq!(snap.flush_latency, Duration::from_micros(100));
    }

    #[test]
    fn test_encode_text() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_served(true, true);
        metrics.record_decision(DecisionKind::Replace);
        metrics.set_entries(4);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("entrystor_lookup_hits_total 1"));
        assert!(text.contains("entrystor_decisions_total{kind=\"replace\"} 1"));
        assert!(text.contains("entrystor_responses_total{source=\"alternative\"} 1"));
        assert!(text.contains("entrystor_entries 4"));
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(1));
        assert!(tracker.elapsed() >= Duration::from_millis(1));
    }
}
