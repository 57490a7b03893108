//! Dispatch gate - single-in-flight scoring with a bounded batch queue

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    Batch, ContractError, Decision, DispatchConfig, PreviewEvent, QueuePolicy, ResultOutput,
    Scorer, StatusEvent, TriggerIndex,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::bus::ResultsBus;
use crate::fusion::decide;
use crate::metrics::{GateMetrics, GateSnapshot};

const DECISION_BROADCAST_CAPACITY: usize = 64;

/// Gate between the alignment engine and the scorer
///
/// At most one batch is being scored at any time. Batches arriving
/// meanwhile wait in a queue of `queue_bound` entries; on overflow the
/// oldest queued batch is dropped, counted and reported on the bus.
/// The gate is the only writer of the result output line.
pub struct DispatchGate {
    scorer: Arc<dyn Scorer>,
    output: Arc<dyn ResultOutput>,
    bus: ResultsBus,
    config: DispatchConfig,
    metrics: Arc<GateMetrics>,
    decisions: broadcast::Sender<Decision>,
}

impl DispatchGate {
    pub fn new(
        scorer: Arc<dyn Scorer>,
        output: Arc<dyn ResultOutput>,
        bus: ResultsBus,
        config: DispatchConfig,
    ) -> Self {
        let (decisions, _) = broadcast::channel(DECISION_BROADCAST_CAPACITY);
        Self {
            scorer,
            output,
            bus,
            config,
            metrics: Arc::new(GateMetrics::new()),
            decisions,
        }
    }

    pub fn metrics(&self) -> Arc<GateMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Receive every decision the gate makes
    ///
    /// A receiver that falls behind loses the oldest decisions; the gate
    /// never waits for it.
    pub fn subscribe_decisions(&self) -> broadcast::Receiver<Decision> {
        self.decisions.subscribe()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Consume batches until the input closes and the queue is drained
    #[instrument(
        name = "dispatch_gate_run",
        skip_all,
        fields(scorer = %self.scorer.name(), queue_bound = self.config.queue_bound)
    )]
    pub async fn run(self, mut batches: mpsc::Receiver<Batch>) -> GateSnapshot {
        info!(
            threshold = self.config.ok_threshold,
            policy = ?self.config.queue_policy,
            "Dispatch gate started"
        );

        let mut queue: VecDeque<Batch> = VecDeque::with_capacity(self.queue_bound() + 1);
        let mut in_flight: JoinSet<Decision> = JoinSet::new();
        let mut current: Option<(TriggerIndex, usize)> = None;
        let mut input_open = true;

        loop {
            tokio::select! {
                received = batches.recv(), if input_open => match received {
                    Some(batch) => self.enqueue(&mut queue, batch),
                    None => {
                        input_open = false;
                        debug!(queued = queue.len(), "Batch input closed, draining");
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    let decision = match joined {
                        Ok(decision) => decision,
                        Err(e) => {
                            let Some((trigger_index, channels)) = current else {
                                warn!(error = %e, "Scorer task failed with no batch in flight");
                                continue;
                            };
                            let error = ContractError::scorer(
                                self.scorer.name(),
                                format!("scorer task failed: {e}"),
                            );
                            let decision = decide(
                                trigger_index,
                                channels,
                                Err(error),
                                self.config.ok_threshold,
                                Duration::ZERO,
                            );
                            self.write_output(decision.accept).await;
                            decision
                        }
                    };
                    current = None;
                    self.finish(decision);
                }
                else => break,
            }

            if in_flight.is_empty() {
                if let Some(batch) = self.take_next(&mut queue) {
                    current = Some((batch.trigger_index(), batch.len()));
                    self.launch(&mut in_flight, batch);
                }
            }

            if !input_open && in_flight.is_empty() && queue.is_empty() {
                break;
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(
            scored = snapshot.batches_scored,
            accepted = snapshot.accepted,
            rejected = snapshot.rejected,
            dropped = snapshot.batches_dropped,
            "Dispatch gate stopped"
        );
        snapshot
    }

    /// Spawn the gate as a background task
    pub fn spawn(self, batches: mpsc::Receiver<Batch>) -> JoinHandle<GateSnapshot> {
        tokio::spawn(self.run(batches))
    }

    fn queue_bound(&self) -> usize {
        self.config.queue_bound.max(1)
    }

    fn enqueue(&self, queue: &mut VecDeque<Batch>, batch: Batch) {
        self.metrics.inc_received();
        if self.config.publish_previews {
            for frame in batch.frames() {
                self.bus.publish_preview(PreviewEvent {
                    trigger_index: batch.trigger_index(),
                    channel_id: frame.channel_id,
                    image: frame.image.clone(),
                });
            }
        }

        queue.push_back(batch);
        while queue.len() > self.queue_bound() {
            if let Some(dropped) = queue.pop_front() {
                let trigger_index = dropped.trigger_index();
                self.metrics.inc_dropped();
                observability::record_queue_drop(trigger_index);
                self.bus
                    .publish_status(StatusEvent::BatchDropped { trigger_index });
                warn!(trigger_index, "Scorer busy, queued batch dropped");
            }
        }
        self.metrics.set_queue_len(queue.len());
    }

    fn take_next(&self, queue: &mut VecDeque<Batch>) -> Option<Batch> {
        let next = match self.config.queue_policy {
            QueuePolicy::NewestFirst => queue.pop_back(),
            QueuePolicy::Fifo => queue.pop_front(),
        };
        self.metrics.set_queue_len(queue.len());
        next
    }

    /// Score on the blocking pool and write the result line there too
    fn launch(&self, in_flight: &mut JoinSet<Decision>, batch: Batch) {
        let scorer = Arc::clone(&self.scorer);
        let output = Arc::clone(&self.output);
        let threshold = self.config.ok_threshold;
        debug!(trigger_index = batch.trigger_index(), "Scoring batch");
        in_flight.spawn_blocking(move || {
            let started = Instant::now();
            let result = scorer.predict(&batch);
            let decision = decide(
                batch.trigger_index(),
                batch.len(),
                result,
                threshold,
                started.elapsed(),
            );
            output.set_output(decision.accept);
            decision
        });
    }

    /// Write the result line off the async worker
    async fn write_output(&self, ok: bool) {
        let output = Arc::clone(&self.output);
        if let Err(e) = tokio::task::spawn_blocking(move || output.set_output(ok)).await {
            warn!(ok, error = %e, "Result line write failed");
        }
    }

    fn finish(&self, decision: Decision) {
        self.metrics
            .record_decision(decision.accept, decision.is_indeterminate());
        observability::record_decision(&decision);
        observability::record_scorer_latency_ms(self.scorer.name(), decision.latency_ms);

        if let contracts::DecisionOutcome::Indeterminate { reason } = &decision.outcome {
            warn!(
                trigger_index = decision.trigger_index,
                reason = %reason,
                latency_ms = decision.latency_ms,
                "Indeterminate decision, rejecting"
            );
        } else {
            debug!(
                trigger_index = decision.trigger_index,
                fused_score = decision.fused_score,
                accept = decision.accept,
                latency_ms = decision.latency_ms,
                "Decision"
            );
        }

        // No subscribers is not an error
        let _ = self.decisions.send(decision.clone());
        self.bus.publish_decision(decision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::ChannelSink;
    use crate::{BusDispatcher, SinkHandle};
    use bytes::Bytes;
    use contracts::{CameraFrame, ChannelId, ImageBuffer, InspectionEvent, PixelFormat, RawFrame};
    use std::sync::Mutex;

    /// Scorer returning a fixed score per channel, optionally slow or failing
    struct FixedScorer {
        scores: Vec<f64>,
        delay: Duration,
        fail: bool,
        calls: Mutex<Vec<TriggerIndex>>,
    }

    impl FixedScorer {
        fn new(scores: Vec<f64>) -> Self {
            Self {
                scores,
                delay: Duration::ZERO,
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Scorer for FixedScorer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn predict(&self, batch: &Batch) -> Result<Vec<f64>, ContractError> {
            self.calls.lock().unwrap().push(batch.trigger_index());
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(ContractError::scorer("fixed", "backend offline"));
            }
            Ok(self.scores.clone())
        }
    }

    #[derive(Default)]
    struct RecordingOutput {
        writes: Mutex<Vec<bool>>,
    }

    impl ResultOutput for RecordingOutput {
        fn set_output(&self, ok: bool) {
            self.writes.lock().unwrap().push(ok);
        }
    }

    /// Records which thread drove each write of the result line
    #[derive(Default)]
    struct ThreadOutput {
        writes: Mutex<Vec<(bool, std::thread::ThreadId)>>,
    }

    impl ResultOutput for ThreadOutput {
        fn set_output(&self, ok: bool) {
            self.writes
                .lock()
                .unwrap()
                .push((ok, std::thread::current().id()));
        }
    }

    struct PanickingScorer;

    impl Scorer for PanickingScorer {
        fn name(&self) -> &str {
            "panicking"
        }

        fn predict(&self, _batch: &Batch) -> Result<Vec<f64>, ContractError> {
            panic!("scorer backend crashed");
        }
    }

    fn batch(trigger_index: TriggerIndex, channels: u16) -> Batch {
        let frames = (0..channels)
            .map(|c| {
                let image =
                    ImageBuffer::new(2, 2, PixelFormat::Mono8, Bytes::from(vec![0u8; 4])).unwrap();
                CameraFrame::tag(
                    ChannelId(c),
                    trigger_index,
                    RawFrame {
                        image,
                        device_timestamp: None,
                    },
                )
            })
            .collect();
        Batch::assemble(trigger_index, frames).unwrap()
    }

    fn config(queue_bound: usize, queue_policy: QueuePolicy) -> DispatchConfig {
        DispatchConfig {
            queue_bound,
            queue_policy,
            publish_previews: false,
            ..DispatchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_gate_writes_output_for_each_decision() {
        let output = Arc::new(RecordingOutput::default());
        let gate = DispatchGate::new(
            Arc::new(FixedScorer::new(vec![0.1, 0.2, 0.3, 0.4])),
            output.clone(),
            ResultsBus::disconnected(),
            config(2, QueuePolicy::NewestFirst),
        );
        let mut decisions = gate.subscribe_decisions();
        let (tx, rx) = mpsc::channel(8);
        let task = gate.spawn(rx);

        tx.send(batch(1, 4)).await.unwrap();
        let decision = decisions.recv().await.unwrap();
        assert_eq!(decision.trigger_index, 1);
        assert!(decision.accept);
        assert_eq!(decision.fused_score, 0.4);

        drop(tx);
        let snapshot = task.await.unwrap();
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(*output.writes.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_gate_scorer_failure_rejects() {
        let output = Arc::new(RecordingOutput::default());
        let gate = DispatchGate::new(
            Arc::new(FixedScorer::new(vec![0.0]).failing()),
            output.clone(),
            ResultsBus::disconnected(),
            config(2, QueuePolicy::NewestFirst),
        );
        let (tx, rx) = mpsc::channel(8);
        let task = gate.spawn(rx);

        tx.send(batch(3, 1)).await.unwrap();
        drop(tx);
        let snapshot = task.await.unwrap();

        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.indeterminate, 1);
        assert_eq!(*output.writes.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn test_gate_writes_output_off_runtime_thread() {
        let runtime_thread = std::thread::current().id();
        let output = Arc::new(ThreadOutput::default());
        let gate = DispatchGate::new(
            Arc::new(FixedScorer::new(vec![0.2, 0.7])),
            output.clone(),
            ResultsBus::disconnected(),
            DispatchConfig {
                ok_threshold: 0.8,
                ..config(4, QueuePolicy::Fifo)
            },
        );
        let (tx, rx) = mpsc::channel(8);
        let task = gate.spawn(rx);

        // Second batch has one camera but gets two scores: indeterminate
        tx.send(batch(1, 2)).await.unwrap();
        tx.send(batch(2, 1)).await.unwrap();
        drop(tx);
        let snapshot = task.await.unwrap();

        let writes = output.writes.lock().unwrap();
        let levels: Vec<bool> = writes.iter().map(|(ok, _)| *ok).collect();
        assert_eq!(levels, vec![true, false]);
        assert_eq!(snapshot.accepted, 1);
        assert_eq!(snapshot.rejected, 1);
        assert!(writes.iter().all(|(_, thread)| *thread != runtime_thread));
    }

    #[tokio::test]
    async fn test_gate_scorer_panic_writes_reject_off_runtime_thread() {
        let runtime_thread = std::thread::current().id();
        let output = Arc::new(ThreadOutput::default());
        let gate = DispatchGate::new(
            Arc::new(PanickingScorer),
            output.clone(),
            ResultsBus::disconnected(),
            config(2, QueuePolicy::NewestFirst),
        );
        let mut decisions = gate.subscribe_decisions();
        let (tx, rx) = mpsc::channel(4);
        let task = gate.spawn(rx);

        tx.send(batch(4, 1)).await.unwrap();
        drop(tx);
        let snapshot = task.await.unwrap();

        let decision = decisions.recv().await.unwrap();
        assert_eq!(decision.trigger_index, 4);
        assert!(!decision.accept);
        assert!(decision.is_indeterminate());
        assert_eq!(snapshot.indeterminate, 1);

        let writes = output.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(!writes[0].0);
        assert_ne!(writes[0].1, runtime_thread);
    }

    #[tokio::test]
    async fn test_gate_overflow_drops_oldest_newest_first() {
        let scorer = Arc::new(FixedScorer::new(vec![0.1]).slow(Duration::from_millis(150)));
        let (bus, bus_rx) = ResultsBus::new(64);
        let (sink, mut events) = ChannelSink::new("observer", 64);
        let bus_task =
            BusDispatcher::with_handles(vec![SinkHandle::spawn(sink, 64)], bus_rx).spawn();

        let gate = DispatchGate::new(
            scorer.clone(),
            Arc::new(RecordingOutput::default()),
            bus,
            config(2, QueuePolicy::NewestFirst),
        );
        let (tx, rx) = mpsc::channel(16);
        let task = gate.spawn(rx);

        // Batch 1 goes in flight; 2..=5 arrive while the scorer is busy
        tx.send(batch(1, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        for ti in 2..=5 {
            tx.send(batch(ti, 1)).await.unwrap();
        }
        drop(tx);

        let snapshot = task.await.unwrap();
        assert_eq!(snapshot.batches_received, 5);
        assert_eq!(snapshot.batches_dropped, 2);
        assert_eq!(snapshot.batches_scored, 3);
        assert_eq!(*scorer.calls.lock().unwrap(), vec![1, 5, 4]);

        bus_task.await.unwrap();
        let mut dropped = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let InspectionEvent::Status(StatusEvent::BatchDropped { trigger_index }) = event {
                dropped.push(trigger_index);
            }
        }
        assert_eq!(dropped, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_gate_fifo_serves_in_arrival_order() {
        let scorer = Arc::new(FixedScorer::new(vec![0.1]).slow(Duration::from_millis(100)));
        let gate = DispatchGate::new(
            scorer.clone(),
            Arc::new(RecordingOutput::default()),
            ResultsBus::disconnected(),
            config(2, QueuePolicy::Fifo),
        );
        let (tx, rx) = mpsc::channel(16);
        let task = gate.spawn(rx);

        tx.send(batch(1, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        for ti in 2..=4 {
            tx.send(batch(ti, 1)).await.unwrap();
        }
        drop(tx);

        let snapshot = task.await.unwrap();
        assert_eq!(snapshot.batches_dropped, 1);
        assert_eq!(*scorer.calls.lock().unwrap(), vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_gate_publishes_previews() {
        let (bus, bus_rx) = ResultsBus::new(64);
        let (sink, mut events) = ChannelSink::new("ui", 64);
        let bus_task =
            BusDispatcher::with_handles(vec![SinkHandle::spawn(sink, 64)], bus_rx).spawn();

        let gate = DispatchGate::new(
            Arc::new(FixedScorer::new(vec![0.9, 0.1])),
            Arc::new(RecordingOutput::default()),
            bus,
            DispatchConfig::default(),
        );
        let (tx, rx) = mpsc::channel(4);
        let task = gate.spawn(rx);
        tx.send(batch(8, 2)).await.unwrap();
        drop(tx);
        task.await.unwrap();
        bus_task.await.unwrap();

        let mut previews = 0;
        let mut decision = None;
        while let Ok(event) = events.try_recv() {
            match event {
                InspectionEvent::Preview(p) => {
                    assert_eq!(p.trigger_index, 8);
                    previews += 1;
                }
                InspectionEvent::Decision(d) => decision = Some(d),
                InspectionEvent::Status(_) => {}
            }
        }
        assert_eq!(previews, 2);
        let decision = decision.unwrap();
        assert!(!decision.accept);
        assert_eq!(decision.per_channel_scores, vec![0.9, 0.1]);
    }
}
