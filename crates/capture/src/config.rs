//! Backpressure configuration and per-channel metrics

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// What to drop when the frame channel is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DropPolicy {
    /// Discard the frame that did not fit
    #[default]
    DropNewest,
    /// Pop the oldest queued frame to make room
    DropOldest,
}

/// Backpressure configuration
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Channel capacity
    pub channel_capacity: usize,

    /// Drop policy when full
    pub drop_policy: DropPolicy,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

impl BackpressureConfig {
    pub fn new(channel_capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
            drop_policy,
        }
    }
}

/// Capture metrics of one channel
#[derive(Debug, Default)]
pub struct CaptureMetrics {
    /// Frames acquired and tagged
    pub frames_captured: AtomicU64,

    /// Frames lost to backpressure
    pub frames_dropped: AtomicU64,

    /// Acquire calls that timed out without a frame
    pub acquire_timeouts: AtomicU64,

    /// Acquire calls that failed
    pub acquire_errors: AtomicU64,

    /// Last observed connection state
    pub connected: AtomicBool,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.acquire_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CaptureMetricsSnapshot {
        CaptureMetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            acquire_errors: self.acquire_errors.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureMetricsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub acquire_timeouts: u64,
    pub acquire_errors: u64,
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = CaptureMetrics::new();
        metrics.record_captured();
        metrics.record_captured();
        metrics.record_dropped();
        metrics.record_timeout();
        metrics.set_connected(true);

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_captured, 2);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.acquire_timeouts, 1);
        assert_eq!(snap.acquire_errors, 0);
        assert!(snap.connected);
    }

    #[test]
    fn test_capacity_floor() {
        let cfg = BackpressureConfig::new(0, DropPolicy::DropNewest);
        assert_eq!(cfg.channel_capacity, 1);
    }
}
