//! Observation points: the read-only [`PoolMetrics`] view and the
//! [`MetricsRecorder`] event sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Passive observer notified of pool lifecycle events. All methods have
/// empty default bodies; implement only the callbacks you care about.
pub trait MetricsRecorder: Send + Sync {
    /// A new resource was allocated successfully, taking `latency`.
    fn record_allocation_success(&self, latency: Duration) {
        let _ = latency;
    }
    /// The allocator failed to produce a resource, after `latency`.
    fn record_allocation_error(&self, latency: Duration) {
        let _ = latency;
    }
    /// The release handler ran (successfully), taking `latency`.
    fn record_reset(&self, latency: Duration) {
        let _ = latency;
    }
    /// The destroy handler ran, taking `latency`.
    fn record_destroy(&self, latency: Duration) {
        let _ = latency;
    }
    /// An idle ref was handed to a borrower instead of allocating fresh.
    fn record_recycled(&self) {}
    /// A resource was destroyed after a total lifetime of `duration`.
    fn record_lifetime(&self, duration: Duration) {
        let _ = duration;
    }
    /// A resource spent `duration` idle before being reused or evicted.
    fn record_idle_time(&self, duration: Duration) {
        let _ = duration;
    }
}

/// A [`MetricsRecorder`] that discards every event. The default when the
/// builder is not given one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {}

/// A [`MetricsRecorder`] that logs each event via `tracing` at debug level.
#[cfg(feature = "tracing")]
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsRecorder;

#[cfg(feature = "tracing")]
impl MetricsRecorder for TracingMetricsRecorder {
    fn record_allocation_success(&self, latency: Duration) {
        tracing::debug!(?latency, "pool: allocation succeeded");
    }
    fn record_allocation_error(&self, latency: Duration) {
        tracing::debug!(?latency, "pool: allocation failed");
    }
    fn record_reset(&self, latency: Duration) {
        tracing::debug!(?latency, "pool: release handler ran");
    }
    fn record_destroy(&self, latency: Duration) {
        tracing::debug!(?latency, "pool: destroy handler ran");
    }
    fn record_recycled(&self) {
        tracing::debug!("pool: idle ref recycled");
    }
    fn record_lifetime(&self, duration: Duration) {
        tracing::debug!(?duration, "pool: resource destroyed");
    }
    fn record_idle_time(&self, duration: Duration) {
        tracing::debug!(?duration, "pool: resource reused after idling");
    }
}

/// A [`MetricsRecorder`] that forwards events to the `metrics` crate's
/// global recorder as counters and histograms.
#[cfg(feature = "metrics")]
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetricsRecorder;

#[cfg(feature = "metrics")]
impl MetricsRecorder for PrometheusMetricsRecorder {
    fn record_allocation_success(&self, latency: Duration) {
        metrics::counter!("respool_allocations_total", "outcome" => "success").increment(1);
        metrics::histogram!("respool_allocation_latency_seconds").record(latency.as_secs_f64());
    }
    fn record_allocation_error(&self, latency: Duration) {
        metrics::counter!("respool_allocations_total", "outcome" => "error").increment(1);
        metrics::histogram!("respool_allocation_latency_seconds").record(latency.as_secs_f64());
    }
    fn record_reset(&self, latency: Duration) {
        metrics::histogram!("respool_reset_latency_seconds").record(latency.as_secs_f64());
    }
    fn record_destroy(&self, latency: Duration) {
        metrics::counter!("respool_destroyed_total").increment(1);
        metrics::histogram!("respool_destroy_latency_seconds").record(latency.as_secs_f64());
    }
    fn record_recycled(&self) {
        metrics::counter!("respool_recycled_total").increment(1);
    }
    fn record_lifetime(&self, duration: Duration) {
        metrics::histogram!("respool_lifetime_seconds").record(duration.as_secs_f64());
    }
    fn record_idle_time(&self, duration: Duration) {
        metrics::histogram!("respool_idle_seconds").record(duration.as_secs_f64());
    }
}

/// Monotonically tracked counters backing [`PoolMetrics`]. Shared behind the
/// pool's inner `Arc` so snapshots can be taken without locking the
/// orchestrator's main state mutex.
#[derive(Debug, Default)]
pub(crate) struct MetricsState {
    allocated: AtomicUsize,
    idle: AtomicUsize,
    pending: AtomicUsize,
    max_allocated: AtomicUsize,
    max_pending: AtomicUsize,
}

impl MetricsState {
    pub(crate) fn set_allocated(&self, n: usize) {
        self.allocated.store(n, Ordering::Relaxed);
        self.max_allocated.fetch_max(n, Ordering::Relaxed);
    }

    pub(crate) fn set_idle(&self, n: usize) {
        self.idle.store(n, Ordering::Relaxed);
    }

    pub(crate) fn set_pending(&self, n: usize) {
        self.pending.store(n, Ordering::Relaxed);
        self.max_pending.fetch_max(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        let allocated = self.allocated.load(Ordering::Relaxed);
        let idle = self.idle.load(Ordering::Relaxed);
        PoolMetrics {
            allocated_size: allocated,
            idle_size: idle,
            acquired_size: allocated.saturating_sub(idle),
            pending_acquire_size: self.pending.load(Ordering::Relaxed),
            max_allocated_size: self.max_allocated.load(Ordering::Relaxed),
            max_pending_acquire_size: self.max_pending.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time, read-only view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Resources currently allocated (idle + acquired).
    pub allocated_size: usize,
    /// Resources currently sitting in the idle store.
    pub idle_size: usize,
    /// Resources currently held by borrowers.
    pub acquired_size: usize,
    /// Borrowers currently waiting in the pending queue.
    pub pending_acquire_size: usize,
    /// High-water mark of `allocated_size` over the pool's lifetime.
    pub max_allocated_size: usize,
    /// High-water mark of `pending_acquire_size` over the pool's lifetime.
    pub max_pending_acquire_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tracks_high_water_marks() {
        let state = MetricsState::default();
        state.set_allocated(3);
        state.set_allocated(1);
        state.set_pending(5);
        state.set_pending(2);
        let snap = state.snapshot();
        assert_eq!(snap.allocated_size, 1);
        assert_eq!(snap.max_allocated_size, 3);
        assert_eq!(snap.pending_acquire_size, 2);
        assert_eq!(snap.max_pending_acquire_size, 5);
    }

    #[test]
    fn noop_recorder_accepts_all_callbacks() {
        let rec = NoopMetricsRecorder;
        rec.record_allocation_success(Duration::from_millis(1));
        rec.record_recycled();
    }
}
