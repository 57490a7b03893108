//! Alignment counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of the alignment engine
#[derive(Debug, Default)]
pub struct AlignmentStats {
    frames_received: AtomicU64,
    batches_emitted: AtomicU64,
    partials_evicted: AtomicU64,
    overflow_evictions: AtomicU64,
    frames_late: AtomicU64,
    frames_duplicate: AtomicU64,
    frames_replaced: AtomicU64,
    frames_unknown_channel: AtomicU64,
}

impl AlignmentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_received(&self) {
        Self::inc(&self.frames_received);
    }

    pub(crate) fn batch_emitted(&self) {
        Self::inc(&self.batches_emitted);
    }

    pub(crate) fn partial_evicted(&self) {
        Self::inc(&self.partials_evicted);
    }

    pub(crate) fn overflow_evicted(&self) {
        Self::inc(&self.overflow_evictions);
        Self::inc(&self.partials_evicted);
    }

    pub(crate) fn frame_late(&self) {
        Self::inc(&self.frames_late);
    }

    pub(crate) fn frame_duplicate(&self) {
        Self::inc(&self.frames_duplicate);
    }

    pub(crate) fn frame_replaced(&self) {
        Self::inc(&self.frames_replaced);
    }

    pub(crate) fn frame_unknown_channel(&self) {
        Self::inc(&self.frames_unknown_channel);
    }

    pub fn snapshot(&self) -> AlignmentSnapshot {
        AlignmentSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            batches_emitted: self.batches_emitted.load(Ordering::Relaxed),
            partials_evicted: self.partials_evicted.load(Ordering::Relaxed),
            overflow_evictions: self.overflow_evictions.load(Ordering::Relaxed),
            frames_late: self.frames_late.load(Ordering::Relaxed),
            frames_duplicate: self.frames_duplicate.load(Ordering::Relaxed),
            frames_replaced: self.frames_replaced.load(Ordering::Relaxed),
            frames_unknown_channel: self.frames_unknown_channel.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of alignment counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentSnapshot {
    pub frames_received: u64,
    pub batches_emitted: u64,
    /// Includes overflow evictions
    pub partials_evicted: u64,
    pub overflow_evictions: u64,
    pub frames_late: u64,
    pub frames_duplicate: u64,
    pub frames_replaced: u64,
    pub frames_unknown_channel: u64,
}

impl AlignmentSnapshot {
    /// Frames refused outright
    pub fn frames_rejected(&self) -> u64 {
        self.frames_late + self.frames_duplicate + self.frames_unknown_channel
    }
}
