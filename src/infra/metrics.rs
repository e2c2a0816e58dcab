//! Lock-free metrics collection and periodic reporting
//!
//! All atomics use Relaxed ordering: these are statistical counters only,
//! never used for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤1ms, ≤2ms, ≤5ms, ≤10ms, ≤25ms, ≤50ms, ≤100ms, ≤250ms, ≤1s, ≤5s, >5s
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [1_000, 2_000, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 1_000_000, 5_000_000];
pub const METRICS_NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Cumulative latency histogram
pub struct LatencyHistogram {
    buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    sum_us: AtomicU64,
    max_us: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64) {
        self.buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.max_us, latency_us);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut buckets = [0u64; METRICS_NUM_BUCKETS];
        for (i, bucket) in self.buckets.iter().enumerate() {
            buckets[i] = bucket.load(Ordering::Relaxed);
        }
        HistogramSnapshot {
            buckets,
            sum_us: self.sum_us.load(Ordering::Relaxed),
            max_us: self.max_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HistogramSnapshot {
    pub buckets: [u64; METRICS_NUM_BUCKETS],
    pub sum_us: u64,
    pub max_us: u64,
}

impl HistogramSnapshot {
    pub fn count(&self) -> u64 {
        self.buckets.iter().sum()
    }

    pub fn avg_us(&self) -> u64 {
        let count = self.count();
        if count == 0 {
            0
        } else {
            self.sum_us / count
        }
    }
}

/// Gateway counters, shared via `Arc` by the HTTP handlers
pub struct Metrics {
    started_at: Instant,
    events_received: AtomicU64,
    events_queued: AtomicU64,
    events_bad_request: AtomicU64,
    events_failed: AtomicU64,
    gate_opened: AtomicU64,
    gate_failed: AtomicU64,
    gate_unknown_lane: AtomicU64,
    publish_latency: LatencyHistogram,
    gate_latency: LatencyHistogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            events_received: AtomicU64::new(0),
            events_queued: AtomicU64::new(0),
            events_bad_request: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            gate_opened: AtomicU64::new(0),
            gate_failed: AtomicU64::new(0),
            gate_unknown_lane: AtomicU64::new(0),
            publish_latency: LatencyHistogram::new(),
            gate_latency: LatencyHistogram::new(),
        }
    }

    #[inline]
    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_bad_request(&self) {
        self.events_bad_request.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_queued(&self, latency_us: u64) {
        self.events_queued.fetch_add(1, Ordering::Relaxed);
        self.publish_latency.record(latency_us);
    }

    #[inline]
    pub fn record_event_failed(&self, latency_us: u64) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
        self.publish_latency.record(latency_us);
    }

    #[inline]
    pub fn record_gate_opened(&self, latency_us: u64) {
        self.gate_opened.fetch_add(1, Ordering::Relaxed);
        self.gate_latency.record(latency_us);
    }

    #[inline]
    pub fn record_gate_failed(&self, latency_us: u64) {
        self.gate_failed.fetch_add(1, Ordering::Relaxed);
        self.gate_latency.record(latency_us);
    }

    #[inline]
    pub fn record_gate_unknown_lane(&self) {
        self.gate_unknown_lane.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot of all counters
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_queued: self.events_queued.load(Ordering::Relaxed),
            events_bad_request: self.events_bad_request.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            gate_opened: self.gate_opened.load(Ordering::Relaxed),
            gate_failed: self.gate_failed.load(Ordering::Relaxed),
            gate_unknown_lane: self.gate_unknown_lane.load(Ordering::Relaxed),
            publish_latency: self.publish_latency.snapshot(),
            gate_latency: self.gate_latency.snapshot(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub events_received: u64,
    pub events_queued: u64,
    pub events_bad_request: u64,
    pub events_failed: u64,
    pub gate_opened: u64,
    pub gate_failed: u64,
    pub gate_unknown_lane: u64,
    pub publish_latency: HistogramSnapshot,
    pub gate_latency: HistogramSnapshot,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            events_received = %self.events_received,
            events_queued = %self.events_queued,
            events_bad_request = %self.events_bad_request,
            events_failed = %self.events_failed,
            publish_avg_us = %self.publish_latency.avg_us(),
            publish_max_us = %self.publish_latency.max_us,
            gate_opened = %self.gate_opened,
            gate_failed = %self.gate_failed,
            gate_unknown_lane = %self.gate_unknown_lane,
            gate_avg_us = %self.gate_latency.avg_us(),
            gate_max_us = %self.gate_latency.max_us,
            "metrics_summary"
        );
    }
}
