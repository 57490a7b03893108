//! Gate and sink metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single sink
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Total successful writes
    write_count: AtomicU64,
    /// Total write failures
    failure_count: AtomicU64,
    /// Total events dropped due to full queue
    dropped_count: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn inc_write_count(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn inc_dropped_count(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            write_count: self.write_count(),
            failure_count: self.failure_count(),
            dropped_count: self.dropped_count(),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub write_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
}

/// Metrics of the dispatch gate
#[derive(Debug, Default)]
pub struct GateMetrics {
    batches_received: AtomicU64,
    batches_scored: AtomicU64,
    batches_dropped: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    indeterminate: AtomicU64,
    queue_len: AtomicUsize,
}

impl GateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_received(&self) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Count a finished decision by outcome
    pub fn record_decision(&self, accept: bool, indeterminate: bool) {
        self.batches_scored.fetch_add(1, Ordering::Relaxed);
        if accept {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        if indeterminate {
            self.indeterminate.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            batches_scored: self.batches_scored.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            indeterminate: self.indeterminate.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of gate metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateSnapshot {
    pub batches_received: u64,
    pub batches_scored: u64,
    pub batches_dropped: u64,
    pub accepted: u64,
    /// Includes indeterminate decisions
    pub rejected: u64,
    pub indeterminate: u64,
    pub queue_len: usize,
}
