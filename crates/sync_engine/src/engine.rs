//! Trigger-index alignment engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use contracts::{AlignmentConfig, Batch, CameraFrame, ChannelId, TriggerIndex};
use observability::{record_batch_emitted, record_frame_rejected, record_partial_evicted};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, trace, warn};

use crate::stats::{AlignmentSnapshot, AlignmentStats};

/// Why a frame was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Index below the eviction watermark; its set can never complete
    Late,
    /// Index already emitted as a batch
    Duplicate,
    /// Channel id outside `0..N`
    UnknownChannel,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Late => "late",
            Rejection::Duplicate => "duplicate",
            Rejection::UnknownChannel => "unknown_channel",
        }
    }
}

/// Result of offering one frame
#[derive(Debug)]
pub enum Admission {
    /// The frame completed its set
    Completed(Batch),
    /// Stored, waiting for other channels
    Pending,
    Rejected(Rejection),
}

/// Partial set dropped without completing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedPartial {
    pub trigger_index: TriggerIndex,
    pub present: Vec<ChannelId>,
    pub missing: Vec<ChannelId>,
    pub age: Duration,
}

/// Frames collected so far for one trigger index
#[derive(Debug)]
struct PartialSet {
    slots: Vec<Option<CameraFrame>>,
    present: usize,
    opened_at: Instant,
}

impl PartialSet {
    fn new(channel_count: usize) -> Self {
        Self {
            slots: (0..channel_count).map(|_| None).collect(),
            present: 0,
            opened_at: Instant::now(),
        }
    }

    /// Store a frame; returns true if it replaced an earlier one
    fn insert(&mut self, frame: CameraFrame) -> bool {
        let slot = &mut self.slots[frame.channel_id.index()];
        let replaced = slot.is_some();
        if !replaced {
            self.present += 1;
        }
        *slot = Some(frame);
        replaced
    }

    fn is_complete(&self) -> bool {
        self.present == self.slots.len()
    }

    fn into_frames(self) -> Vec<CameraFrame> {
        self.slots.into_iter().flatten().collect()
    }

    fn into_evicted(self, trigger_index: TriggerIndex) -> EvictedPartial {
        let mut present = Vec::with_capacity(self.present);
        let mut missing = Vec::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            let id = ChannelId(idx as u16);
            if slot.is_some() {
                present.push(id);
            } else {
                missing.push(id);
            }
        }
        EvictedPartial {
            trigger_index,
            present,
            missing,
            age: self.opened_at.elapsed(),
        }
    }
}

enum Step {
    Complete(TriggerIndex, Vec<CameraFrame>),
    Pending { replaced: bool },
    Reject(Rejection),
}

#[derive(Debug, Default)]
struct AlignmentState {
    partials: BTreeMap<TriggerIndex, PartialSet>,
    /// Highest index emitted so far
    latest_complete: Option<TriggerIndex>,
    /// Frames below this index are refused
    watermark: TriggerIndex,
    /// Emitted indices at or above the watermark
    completed: BTreeSet<TriggerIndex>,
}

impl AlignmentState {
    fn admit(
        &mut self,
        frame: CameraFrame,
        channel_count: usize,
        max_partials: usize,
    ) -> (Step, Option<EvictedPartial>) {
        let ti = frame.trigger_index;
        if frame.channel_id.index() >= channel_count {
            return (Step::Reject(Rejection::UnknownChannel), None);
        }
        if ti < self.watermark {
            return (Step::Reject(Rejection::Late), None);
        }
        if self.completed.contains(&ti) {
            return (Step::Reject(Rejection::Duplicate), None);
        }

        let mut overflow = None;
        if !self.partials.contains_key(&ti) && self.partials.len() >= max_partials {
            match self.partials.first_key_value() {
                Some((&oldest, _)) if oldest < ti => {
                    if let Some((key, partial)) = self.partials.pop_first() {
                        self.watermark = self.watermark.max(key + 1);
                        overflow = Some(partial.into_evicted(key));
                    }
                }
                _ => return (Step::Reject(Rejection::Late), None),
            }
        }

        let partial = self
            .partials
            .entry(ti)
            .or_insert_with(|| PartialSet::new(channel_count));
        let replaced = partial.insert(frame);

        if !partial.is_complete() {
            return (Step::Pending { replaced }, overflow);
        }

        let step = match self.partials.remove(&ti) {
            Some(done) => {
                self.latest_complete = Some(self.latest_complete.map_or(ti, |l| l.max(ti)));
                self.completed.insert(ti);
                Step::Complete(ti, done.into_frames())
            }
            None => Step::Pending { replaced },
        };
        (step, overflow)
    }

    fn sweep(&mut self) -> Vec<EvictedPartial> {
        let Some(latest) = self.latest_complete else {
            return Vec::new();
        };
        let cutoff = latest.saturating_sub(1);
        self.watermark = self.watermark.max(cutoff);

        let retained = self.partials.split_off(&cutoff);
        let stale = std::mem::replace(&mut self.partials, retained);
        self.completed = self.completed.split_off(&cutoff);

        stale
            .into_iter()
            .map(|(ti, partial)| partial.into_evicted(ti))
            .collect()
    }
}

/// Aligns tagged frames from N channels into complete batches
///
/// `on_frame` may be called concurrently from any number of threads;
/// the critical section is a map lookup plus a slot write.
#[derive(Debug)]
pub struct AlignmentEngine {
    channel_count: usize,
    max_partials: usize,
    state: Mutex<AlignmentState>,
    stats: AlignmentStats,
    evictions: Option<mpsc::UnboundedSender<EvictedPartial>>,
}

impl AlignmentEngine {
    pub fn new(channel_count: usize, config: &AlignmentConfig) -> Self {
        Self {
            channel_count,
            max_partials: config.max_partials.max(1),
            state: Mutex::new(AlignmentState::default()),
            stats: AlignmentStats::new(),
            evictions: None,
        }
    }

    /// Also publish every eviction on `tx`
    pub fn with_eviction_listener(mut self, tx: mpsc::UnboundedSender<EvictedPartial>) -> Self {
        self.evictions = Some(tx);
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Offer a frame, returning the batch it completed, if any
    pub fn on_frame(&self, frame: CameraFrame) -> Option<Batch> {
        match self.offer(frame) {
            Admission::Completed(batch) => Some(batch),
            Admission::Pending | Admission::Rejected(_) => None,
        }
    }

    /// Offer a frame and report what happened to it
    #[instrument(
        level = "trace",
        name = "alignment_offer",
        skip(self, frame),
        fields(channel_id = %frame.channel_id, trigger_index = frame.trigger_index)
    )]
    pub fn offer(&self, frame: CameraFrame) -> Admission {
        self.stats.frame_received();
        let channel_id = frame.channel_id;
        let trigger_index = frame.trigger_index;

        let (step, overflow) = self
            .lock()
            .admit(frame, self.channel_count, self.max_partials);

        if let Some(evicted) = overflow {
            self.stats.overflow_evicted();
            self.report_eviction(&evicted, "partial set limit reached");
        }

        match step {
            Step::Complete(ti, frames) => match Batch::assemble(ti, frames) {
                Ok(batch) => {
                    self.stats.batch_emitted();
                    record_batch_emitted(&batch);
                    debug!(
                        trigger_index = ti,
                        skew_ms = batch.capture_skew_ms(),
                        "batch complete"
                    );
                    Admission::Completed(batch)
                }
                Err(e) => {
                    error!(trigger_index = ti, error = %e, "failed to assemble batch");
                    Admission::Pending
                }
            },
            Step::Pending { replaced } => {
                if replaced {
                    self.stats.frame_replaced();
                    debug!(%channel_id, trigger_index, "frame replaced earlier frame of same channel");
                }
                Admission::Pending
            }
            Step::Reject(reason) => {
                match reason {
                    Rejection::Late => self.stats.frame_late(),
                    Rejection::Duplicate => self.stats.frame_duplicate(),
                    Rejection::UnknownChannel => self.stats.frame_unknown_channel(),
                }
                record_frame_rejected(reason.as_str());
                trace!(%channel_id, trigger_index, reason = reason.as_str(), "frame rejected");
                Admission::Rejected(reason)
            }
        }
    }

    /// Drop every partial set older than `latest_complete - 1`
    ///
    /// Evicted indices are permanently lost; frames that arrive for them
    /// later are rejected as late.
    #[instrument(level = "trace", name = "alignment_sweep", skip(self))]
    pub fn sweep(&self) -> Vec<EvictedPartial> {
        let (evicted, pending) = {
            let mut state = self.lock();
            let evicted = state.sweep();
            (evicted, state.partials.len())
        };

        for partial in &evicted {
            self.stats.partial_evicted();
            self.report_eviction(partial, "stale partial set");
        }
        observability::record_pending_partials(pending);
        evicted
    }

    fn report_eviction(&self, partial: &EvictedPartial, cause: &'static str) {
        record_partial_evicted(&partial.missing);
        warn!(
            trigger_index = partial.trigger_index,
            missing = ?partial.missing,
            present = partial.present.len(),
            age_ms = partial.age.as_secs_f64() * 1000.0,
            cause,
            "partial set evicted"
        );
        if let Some(tx) = &self.evictions {
            let _ = tx.send(partial.clone());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().partials.len()
    }

    pub fn pending_indices(&self) -> Vec<TriggerIndex> {
        self.lock().partials.keys().copied().collect()
    }

    pub fn latest_complete(&self) -> Option<TriggerIndex> {
        self.lock().latest_complete
    }

    /// Lowest index still accepted
    pub fn watermark(&self) -> TriggerIndex {
        self.lock().watermark
    }

    pub fn stats(&self) -> AlignmentSnapshot {
        self.stats.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, AlignmentState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{ImageBuffer, PixelFormat, RawFrame};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn frame(channel: u16, trigger_index: TriggerIndex) -> CameraFrame {
        let image = ImageBuffer::new(1, 1, PixelFormat::Mono8, Bytes::from(vec![channel as u8]))
            .unwrap();
        CameraFrame::tag(
            ChannelId(channel),
            trigger_index,
            RawFrame {
                image,
                device_timestamp: None,
            },
        )
    }

    fn engine(n: usize) -> AlignmentEngine {
        AlignmentEngine::new(n, &AlignmentConfig::default())
    }

    #[test]
    fn test_batch_on_last_channel() {
        let engine = engine(3);
        assert!(engine.on_frame(frame(2, 5)).is_none());
        assert!(engine.on_frame(frame(0, 5)).is_none());
        let batch = engine.on_frame(frame(1, 5)).expect("complete");

        assert_eq!(batch.trigger_index(), 5);
        let ids: Vec<_> = batch.frames().iter().map(|f| f.channel_id).collect();
        assert_eq!(ids, vec![ChannelId(0), ChannelId(1), ChannelId(2)]);
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.latest_complete(), Some(5));
    }

    #[test]
    fn test_completed_index_rejected_as_duplicate() {
        let engine = engine(2);
        engine.on_frame(frame(0, 1));
        assert!(engine.on_frame(frame(1, 1)).is_some());

        assert!(matches!(
            engine.offer(frame(0, 1)),
            Admission::Rejected(Rejection::Duplicate)
        ));
        assert!(engine.on_frame(frame(1, 1)).is_none());
        assert_eq!(engine.stats().batches_emitted, 1);
        assert_eq!(engine.stats().frames_duplicate, 2);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_same_channel_twice_latest_wins() {
        let engine = engine(2);
        let mut first = frame(0, 4);
        first.hardware_timestamp = Some(1);
        let mut second = frame(0, 4);
        second.hardware_timestamp = Some(2);

        engine.on_frame(first);
        engine.on_frame(second);
        let batch = engine.on_frame(frame(1, 4)).unwrap();

        assert_eq!(batch.frames()[0].hardware_timestamp, Some(2));
        assert_eq!(engine.stats().frames_replaced, 1);
    }

    #[test]
    fn test_sweep_keeps_latest_minus_one() {
        let engine = engine(2);
        for ti in [3, 8, 9, 11] {
            engine.on_frame(frame(0, ti));
        }
        engine.on_frame(frame(0, 10));
        engine.on_frame(frame(1, 10)).unwrap();

        let evicted = engine.sweep();
        let evicted_idx: Vec<_> = evicted.iter().map(|e| e.trigger_index).collect();
        assert_eq!(evicted_idx, vec![3, 8]);
        assert_eq!(evicted[0].missing, vec![ChannelId(1)]);
        assert_eq!(evicted[0].present, vec![ChannelId(0)]);
        assert_eq!(engine.pending_indices(), vec![9, 11]);
        assert_eq!(engine.watermark(), 9);
        assert_eq!(engine.stats().partials_evicted, 2);
    }

    #[test]
    fn test_sweep_before_any_batch_is_noop() {
        let engine = engine(2);
        engine.on_frame(frame(0, 1));
        engine.on_frame(frame(0, 2));
        assert!(engine.sweep().is_empty());
        assert_eq!(engine.pending_count(), 2);
    }

    #[test]
    fn test_late_frame_after_eviction_never_completes() {
        let engine = engine(2);
        engine.on_frame(frame(0, 1));
        engine.on_frame(frame(0, 5));
        engine.on_frame(frame(1, 5)).unwrap();
        assert_eq!(engine.sweep().len(), 1);

        assert!(matches!(
            engine.offer(frame(1, 1)),
            Admission::Rejected(Rejection::Late)
        ));
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.stats().batches_emitted, 1);
    }

    #[test]
    fn test_out_of_order_discovery() {
        let engine = engine(2);
        engine.on_frame(frame(0, 4));
        engine.on_frame(frame(0, 5));
        let first = engine.on_frame(frame(1, 5)).unwrap();
        let second = engine.on_frame(frame(1, 4)).unwrap();

        assert_eq!(first.trigger_index(), 5);
        assert_eq!(second.trigger_index(), 4);
        assert_eq!(engine.latest_complete(), Some(5));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let engine = engine(2);
        assert!(matches!(
            engine.offer(frame(2, 1)),
            Admission::Rejected(Rejection::UnknownChannel)
        ));
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_partial_limit_evicts_oldest() {
        let config = AlignmentConfig {
            max_partials: 3,
            ..AlignmentConfig::default()
        };
        let engine = AlignmentEngine::new(2, &config);
        for ti in 1..=3 {
            engine.on_frame(frame(0, ti));
        }
        engine.on_frame(frame(0, 4));

        assert_eq!(engine.pending_indices(), vec![2, 3, 4]);
        assert_eq!(engine.stats().overflow_evictions, 1);
        assert!(matches!(
            engine.offer(frame(1, 1)),
            Admission::Rejected(Rejection::Late)
        ));
        // Older than everything retained while full
        assert!(matches!(
            engine.offer(frame(0, 0)),
            Admission::Rejected(Rejection::Late)
        ));
        // Existing keys still accept frames while full
        assert!(engine.on_frame(frame(1, 3)).is_some());
    }

    #[test]
    fn test_eviction_listener_receives_evictions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = engine(2).with_eviction_listener(tx);
        engine.on_frame(frame(1, 1));
        engine.on_frame(frame(0, 3));
        engine.on_frame(frame(1, 3)).unwrap();
        engine.sweep();

        let evicted = rx.try_recv().unwrap();
        assert_eq!(evicted.trigger_index, 1);
        assert_eq!(evicted.missing, vec![ChannelId(0)]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_single_channel_completes_immediately() {
        let engine = engine(1);
        let batch = engine.on_frame(frame(0, 9)).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_concurrent_exactly_once() {
        const CHANNELS: u16 = 4;
        const TRIGGERS: u64 = 500;

        let engine = Arc::new(AlignmentEngine::new(
            CHANNELS as usize,
            &AlignmentConfig {
                max_partials: 1024,
                ..AlignmentConfig::default()
            },
        ));

        let workers: Vec<_> = (0..CHANNELS)
            .map(|ch| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    let mut emitted = Vec::new();
                    for ti in 1..=TRIGGERS {
                        if let Some(batch) = engine.on_frame(frame(ch, ti)) {
                            emitted.push(batch.trigger_index());
                        }
                    }
                    emitted
                })
            })
            .collect();

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.join().unwrap());
        }

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), TRIGGERS as usize);
        assert_eq!(unique.len(), TRIGGERS as usize);
        assert_eq!(engine.pending_count(), 0);
    }
}
