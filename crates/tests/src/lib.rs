//! # Integration Tests
//!
//! Cross-crate and end-to-end tests.
//!
//! Covers:
//! - Alignment under channel drops and concurrent producers
//! - Index stamping when one camera finishes readout late
//! - Dispatch gate behavior under a slow scorer
//! - Trigger fallback through the public facade
//! - Full pipeline without hardware: synthetic trigger and sensors

#[cfg(test)]
mod support {
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use contracts::{
        Batch, CameraFrame, ChannelId, ImageBuffer, PixelFormat, RawFrame, ResultOutput,
        TriggerIndex,
    };

    pub fn frame(channel: u16, trigger_index: TriggerIndex, fill: u8) -> CameraFrame {
        let image =
            ImageBuffer::new(2, 2, PixelFormat::Mono8, Bytes::from(vec![fill; 4])).unwrap();
        CameraFrame::tag(
            ChannelId(channel),
            trigger_index,
            RawFrame {
                image,
                device_timestamp: None,
            },
        )
    }

    pub fn batch(trigger_index: TriggerIndex, channels: u16, fill: u8) -> Batch {
        let frames = (0..channels)
            .map(|ch| frame(ch, trigger_index, fill))
            .collect();
        Batch::assemble(trigger_index, frames).unwrap()
    }

    pub fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    /// Result line that remembers every write
    #[derive(Debug, Default)]
    pub struct RecordingOutput {
        writes: Mutex<Vec<bool>>,
    }

    impl RecordingOutput {
        pub fn writes(&self) -> Vec<bool> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl ResultOutput for RecordingOutput {
        fn set_output(&self, ok: bool) {
            self.writes.lock().unwrap().push(ok);
        }
    }
}

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }
}

#[cfg(test)]
mod alignment_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use contracts::{AlignmentConfig, ChannelId};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use sync_engine::{Admission, AlignmentEngine, Rejection};

    use crate::support::frame;

    /// 4 channels, 1000 triggers, channel 3 loses about 1% of its frames
    #[test]
    fn test_flaky_channel_loses_only_its_indices() {
        const CHANNELS: u16 = 4;
        const TRIGGERS: u64 = 1000;

        let engine = AlignmentEngine::new(CHANNELS as usize, &AlignmentConfig::default());
        let mut rng = StdRng::seed_from_u64(42);
        let mut dropped = HashSet::new();
        let mut emitted = Vec::new();
        let mut evicted = Vec::new();

        // Two extra clean triggers push the last drops below the eviction line
        for ti in 1..=TRIGGERS + 2 {
            for ch in 0..CHANNELS {
                if ch == 3 && ti <= TRIGGERS && rng.random_bool(0.01) {
                    dropped.insert(ti);
                    continue;
                }
                if let Some(batch) = engine.on_frame(frame(ch, ti, 0)) {
                    emitted.push(batch.trigger_index());
                }
            }
            evicted.extend(engine.sweep());
        }

        let total = TRIGGERS + 2;
        assert_eq!(emitted.len() as u64, total - dropped.len() as u64);
        assert!(emitted.windows(2).all(|w| w[0] < w[1]));
        assert!(emitted.iter().all(|ti| !dropped.contains(ti)));

        let evicted_indices: HashSet<_> = evicted.iter().map(|e| e.trigger_index).collect();
        assert_eq!(evicted_indices, dropped);
        assert!(evicted.iter().all(|e| e.missing == vec![ChannelId(3)]));
        assert_eq!(engine.pending_count(), 0);

        let stats = engine.stats();
        assert_eq!(stats.batches_emitted, emitted.len() as u64);
        assert_eq!(stats.partials_evicted, dropped.len() as u64);
        assert_eq!(stats.overflow_evictions, 0);
        assert_eq!(stats.frames_rejected(), 0);
    }

    #[test]
    fn test_dead_channel_bounded_by_max_partials() {
        let config = AlignmentConfig::default();
        let engine = AlignmentEngine::new(2, &config);

        for ti in 1..=200 {
            assert!(engine.on_frame(frame(0, ti, 0)).is_none());
            assert!(engine.pending_count() <= config.max_partials);
            engine.sweep();
        }

        assert_eq!(engine.pending_count(), config.max_partials);
        let stats = engine.stats();
        assert_eq!(stats.batches_emitted, 0);
        assert_eq!(stats.overflow_evictions, 200 - config.max_partials as u64);
        // Oldest sets go first
        assert_eq!(
            engine.pending_indices().first().copied(),
            Some(200 - config.max_partials as u64 + 1)
        );
    }

    #[test]
    fn test_late_frame_after_eviction_never_completes() {
        let engine = AlignmentEngine::new(2, &AlignmentConfig::default());

        engine.on_frame(frame(0, 1, 0));
        for ti in 2..=3 {
            engine.on_frame(frame(0, ti, 0));
            assert!(engine.on_frame(frame(1, ti, 0)).is_some());
        }
        let evicted = engine.sweep();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].trigger_index, 1);
        assert_eq!(evicted[0].present, vec![ChannelId(0)]);
        assert_eq!(engine.watermark(), 2);

        assert!(matches!(
            engine.offer(frame(1, 1, 0)),
            Admission::Rejected(Rejection::Late)
        ));
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.stats().frames_late, 1);
    }

    /// Producers race on shared indices while one channel drops frames
    #[test]
    fn test_concurrent_producers_with_drops_emit_once() {
        const CHANNELS: u16 = 3;
        const TRIGGERS: u64 = 400;

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
                        if ch == 0 && ti % 10 == 0 {
                            continue;
                        }
                        if let Some(batch) = engine.on_frame(frame(ch, ti, 0)) {
                            assert_eq!(batch.len(), CHANNELS as usize);
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
        assert_eq!(all.len(), unique.len());
        assert_eq!(all.len() as u64, TRIGGERS - TRIGGERS / 10);
        assert!(unique.iter().all(|ti| ti % 10 != 0));
        assert_eq!(engine.pending_count(), (TRIGGERS / 10) as usize);
    }
}

#[cfg(test)]
mod dispatch_tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use contracts::{
        Batch, ContractError, DispatchConfig, InspectionEvent, QueuePolicy, Scorer, StatusEvent,
    };
    use dispatcher::{decide, DispatchGate, ResultsBus, INDETERMINATE_SCORE};
    use tokio::sync::mpsc;

    use crate::support::{batch, RecordingOutput};

    #[test]
    fn test_fusion_examples() {
        let reject = decide(1, 4, Ok(vec![0.1, 0.2, 0.6, 0.3]), 0.5, Duration::ZERO);
        assert_eq!(reject.fused_score, 0.6);
        assert!(!reject.accept);

        let accept = decide(2, 4, Ok(vec![0.1, 0.2, 0.3, 0.4]), 0.5, Duration::ZERO);
        assert_eq!(accept.fused_score, 0.4);
        assert!(accept.accept);

        // Equal to the threshold is not below it
        let boundary = decide(3, 2, Ok(vec![0.5, 0.1]), 0.5, Duration::ZERO);
        assert!(!boundary.accept);

        let failed = decide(
            4,
            2,
            Err(ContractError::scorer("model", "backend timeout")),
            0.5,
            Duration::ZERO,
        );
        assert!(failed.is_indeterminate());
        assert!(!failed.accept);
        assert_eq!(failed.fused_score, INDETERMINATE_SCORE);
    }

    /// Scorer slow enough to back up the gate
    struct SlowScorer(Duration);

    impl Scorer for SlowScorer {
        fn name(&self) -> &str {
            "slow"
        }

        fn predict(&self, batch: &Batch) -> Result<Vec<f64>, ContractError> {
            thread::sleep(self.0);
            Ok(vec![0.1; batch.len()])
        }
    }

    #[tokio::test]
    async fn test_burst_behind_slow_scorer_sheds_oldest() {
        const BURST: u64 = 10;

        let (bus, mut events) = ResultsBus::new(256);
        let output = Arc::new(RecordingOutput::default());
        let config = DispatchConfig {
            queue_bound: 2,
            queue_policy: QueuePolicy::NewestFirst,
            publish_previews: false,
            ..DispatchConfig::default()
        };
        let gate = DispatchGate::new(
            Arc::new(SlowScorer(Duration::from_millis(40))),
            output.clone(),
            bus.clone(),
            config,
        );
        let (tx, rx) = mpsc::channel(64);
        let handle = gate.spawn(rx);

        for ti in 1..=BURST {
            tx.send(batch(ti, 2, 0)).await.unwrap();
        }
        drop(tx);
        let snapshot = handle.await.unwrap();
        drop(bus);

        assert_eq!(snapshot.batches_received, BURST);
        assert_eq!(snapshot.batches_scored + snapshot.batches_dropped, BURST);
        assert!(snapshot.batches_dropped > 0);
        assert_eq!(snapshot.accepted, snapshot.batches_scored);
        assert_eq!(output.writes().len() as u64, snapshot.batches_scored);
        assert!(output.writes().iter().all(|ok| *ok));

        let mut decided = Vec::new();
        let mut dropped = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                InspectionEvent::Decision(d) => decided.push(d.trigger_index),
                InspectionEvent::Status(StatusEvent::BatchDropped { trigger_index }) => {
                    dropped.push(trigger_index)
                }
                _ => {}
            }
        }
        assert_eq!(dropped.len() as u64, snapshot.batches_dropped);
        assert!(decided.contains(&1));
        assert!(decided.contains(&BURST));
        assert!(decided.iter().all(|ti| !dropped.contains(ti)));
    }
}

#[cfg(test)]
mod trigger_tests {
    use std::time::Duration;

    use contracts::{DioConfig, ResultOutput, TriggerConfig};
    use trigger_source::mock::MockDioProvider;
    use trigger_source::{TriggerMode, TriggerSource};

    use crate::support::wait_for;

    fn config() -> TriggerConfig {
        TriggerConfig {
            dio: Some(DioConfig {
                output_port: Some(1),
                ok_bit: Some(2),
                ..DioConfig::default()
            }),
            synthetic_hz: 200.0,
            disconnect_after_errors: 5,
        }
    }

    #[test]
    fn test_disconnect_mid_run_keeps_index_moving() {
        let (provider, handle) = MockDioProvider::new();
        let source = TriggerSource::open(&config(), &provider);
        assert_eq!(source.mode(), TriggerMode::Hardware);

        let reader = source.reader();
        let mut mode = source.subscribe_mode();
        handle.queue_pulses(3);
        source.start();

        assert!(wait_for(|| reader.current_index() == 3, Duration::from_secs(2)));
        source.set_output(true);
        assert!(handle.writes().contains(&(1, 2, true)));

        handle.set_disconnected(true);
        assert!(wait_for(
            || *mode.borrow_and_update() == TriggerMode::Synthetic,
            Duration::from_secs(2)
        ));
        assert!(wait_for(|| reader.current_index() > 6, Duration::from_secs(2)));
        assert_eq!(source.mode(), TriggerMode::Synthetic);

        // No result line once synthetic
        let writes = handle.writes().len();
        source.set_output(false);
        assert_eq!(handle.writes().len(), writes);

        source.stop();
        assert!(handle.is_closed());
    }

    #[test]
    fn test_second_open_falls_back_to_synthetic() {
        let (provider, _handle) = MockDioProvider::new();
        let first = TriggerSource::open(&config(), &provider);
        let second = TriggerSource::open(&config(), &provider);
        assert_eq!(first.mode(), TriggerMode::Hardware);
        assert_eq!(second.mode(), TriggerMode::Synthetic);
    }
}

#[cfg(test)]
mod stamping_tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use bytes::Bytes;
    use capture::{BackpressureConfig, CapturePipeline, DropPolicy};
    use contracts::{
        AlignmentConfig, ChannelId, ContractError, FrameSensor, ImageBuffer, IndexReader,
        PixelFormat, RawFrame, TriggerIndex,
    };
    use sync_engine::AlignmentEngine;

    use crate::support::frame;

    struct SharedIndex(Arc<AtomicU64>);

    impl IndexReader for SharedIndex {
        fn current_index(&self) -> TriggerIndex {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Delivers one frame, optionally holding it until released
    struct OneFrameSensor {
        release: Option<std_mpsc::Receiver<()>>,
        delivered: bool,
    }

    impl OneFrameSensor {
        fn immediate() -> Self {
            Self {
                release: None,
                delivered: false,
            }
        }

        fn held(release: std_mpsc::Receiver<()>) -> Self {
            Self {
                release: Some(release),
                delivered: false,
            }
        }
    }

    impl FrameSensor for OneFrameSensor {
        fn acquire(&mut self, timeout: Duration) -> Result<Option<RawFrame>, ContractError> {
            if self.delivered {
                thread::sleep(timeout);
                return Ok(None);
            }
            if let Some(release) = &self.release {
                if release.recv_timeout(timeout).is_err() {
                    return Ok(None);
                }
            }
            self.delivered = true;
            let image = ImageBuffer::new(2, 2, PixelFormat::Mono8, Bytes::from(vec![0u8; 4]))?;
            Ok(Some(RawFrame {
                image,
                device_timestamp: None,
            }))
        }
    }

    /// Both cameras expose for trigger 5, but channel 1 finishes its
    /// readout after the next edge and stamps 6
    #[test]
    fn test_slow_readout_stamps_next_index() {
        let index = Arc::new(AtomicU64::new(5));
        let reader: Arc<dyn IndexReader> = Arc::new(SharedIndex(Arc::clone(&index)));
        let (release_tx, release_rx) = std_mpsc::channel();

        let mut capture =
            CapturePipeline::new(reader, BackpressureConfig::new(16, DropPolicy::DropOldest));
        capture
            .add_channel(
                ChannelId(0),
                Box::new(OneFrameSensor::immediate()),
                Duration::from_millis(5),
            )
            .unwrap();
        capture
            .add_channel(
                ChannelId(1),
                Box::new(OneFrameSensor::held(release_rx)),
                Duration::from_millis(5),
            )
            .unwrap();
        let rx = capture.take_receiver().unwrap();
        capture.start_all();

        let fast = rx.recv_blocking().unwrap();
        index.store(6, Ordering::SeqCst);
        release_tx.send(()).unwrap();
        let slow = rx.recv_blocking().unwrap();
        capture.stop_all();

        assert_eq!((fast.channel_id, fast.trigger_index), (ChannelId(0), 5));
        assert_eq!((slow.channel_id, slow.trigger_index), (ChannelId(1), 6));

        let engine = AlignmentEngine::new(2, &AlignmentConfig::default());
        assert!(engine.on_frame(fast).is_none());
        assert!(engine.on_frame(slow).is_none());
        assert_eq!(engine.pending_indices(), vec![5, 6]);

        let mut emitted = Vec::new();
        for ti in 7..=8 {
            for ch in 0..2 {
                emitted.extend(engine.on_frame(frame(ch, ti, 0)));
            }
        }
        let indices: Vec<_> = emitted.iter().map(|b| b.trigger_index()).collect();
        assert_eq!(indices, vec![7, 8]);
        assert!(emitted
            .iter()
            .all(|b| b.frames().iter().all(|f| f.trigger_index == b.trigger_index())));

        let evicted = engine.sweep();
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].trigger_index, 5);
        assert_eq!(evicted[0].present, vec![ChannelId(0)]);
        assert_eq!(evicted[0].missing, vec![ChannelId(1)]);
        assert_eq!(evicted[1].trigger_index, 6);
        assert_eq!(evicted[1].present, vec![ChannelId(1)]);
        assert_eq!(evicted[1].missing, vec![ChannelId(0)]);
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.stats().batches_emitted, 2);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use capture::{BackpressureConfig, CapturePipeline, DropPolicy, SyntheticFill, SyntheticSensor};
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        AlignmentConfig, ChannelId, DispatchConfig, IndexReader, InspectionEvent, StatusEvent,
    };
    use dispatcher::{BusDispatcher, ChannelSink, DispatchGate, MockScorer, ResultsBus, SinkHandle};
    use sync_engine::{AlignmentEngine, AlignmentTask};
    use tokio::sync::mpsc;
    use trigger_source::{TriggerMode, TriggerSource};

    use crate::support::{frame, RecordingOutput};

    /// Synthetic trigger -> capture -> alignment -> gate -> results bus
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_e2e_synthetic_pipeline() {
        const CHANNELS: u16 = 3;
        const WANTED: usize = 5;

        // Results bus with one in-process observer
        let (bus, bus_rx) = ResultsBus::new(1024);
        let (sink, mut events) = ChannelSink::new("observer", 4096);
        let bus_handle = BusDispatcher::with_handles(vec![SinkHandle::spawn(sink, 1024)], bus_rx)
            .spawn();

        let trigger = TriggerSource::synthetic(50.0);
        assert_eq!(trigger.mode(), TriggerMode::Synthetic);
        let reader: Arc<dyn IndexReader> = Arc::new(trigger.reader());

        let mut capture = CapturePipeline::new(
            reader,
            BackpressureConfig::new(256, DropPolicy::DropOldest),
        );
        for ch in 0..CHANNELS {
            // 51 / 255 = 0.2, below the default threshold
            let sensor = SyntheticSensor::new(400.0)
                .with_size(8, 8)
                .with_fill(SyntheticFill::Constant(51));
            capture
                .add_channel(ChannelId(ch), Box::new(sensor), Duration::from_millis(20))
                .unwrap();
        }
        let frames = capture.take_receiver().unwrap();

        let alignment = AlignmentConfig::default();
        let engine = Arc::new(AlignmentEngine::new(CHANNELS as usize, &alignment));
        let (batch_tx, batch_rx) = mpsc::channel(32);
        let alignment_handle =
            AlignmentTask::new(Arc::clone(&engine), &alignment).spawn(frames.clone(), batch_tx);

        let output = Arc::new(RecordingOutput::default());
        let gate = DispatchGate::new(
            Arc::new(MockScorer::new()),
            output.clone(),
            bus.clone(),
            DispatchConfig::default(),
        );
        let gate_handle = gate.spawn(batch_rx);

        capture.start_all();
        trigger.start();

        let mut decisions = Vec::new();
        let mut previews = 0usize;
        let collected = tokio::time::timeout(Duration::from_secs(10), async {
            while decisions.len() < WANTED {
                match events.recv().await {
                    Some(InspectionEvent::Decision(d)) => decisions.push(d),
                    Some(InspectionEvent::Preview(_)) => previews += 1,
                    Some(InspectionEvent::Status(_)) => {}
                    None => break,
                }
            }
        })
        .await;
        assert!(collected.is_ok(), "only {} decisions", decisions.len());

        // Shutdown: sources first, then each stage drains
        trigger.stop();
        capture.stop_all();
        frames.close();
        let alignment_stats = alignment_handle.await.unwrap();
        let gate_stats = gate_handle.await.unwrap();
        drop(bus);
        let sinks = bus_handle.await.unwrap();

        assert!(trigger.current_index() > 0);
        assert!(alignment_stats.batches_emitted >= WANTED as u64);
        assert!(gate_stats.batches_scored >= WANTED as u64);
        assert_eq!(gate_stats.rejected, 0);
        assert_eq!(output.writes().len() as u64, gate_stats.batches_scored);
        assert!(previews >= WANTED * CHANNELS as usize);

        let indices: HashSet<_> = decisions.iter().map(|d| d.trigger_index).collect();
        assert_eq!(indices.len(), decisions.len());
        for decision in &decisions {
            assert!(decision.accept);
            assert_eq!(decision.per_channel_scores.len(), CHANNELS as usize);
            assert!((decision.fused_score - 0.2).abs() < 1e-9);
        }

        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].0, "observer");
        assert_eq!(sinks[0].1.failure_count, 0);
    }

    #[tokio::test]
    async fn test_blueprint_drives_engine_and_bus() {
        let content = r#"
[trigger]
synthetic_hz = 30.0

[[channels]]
serial = "CAM-A"

[[channels]]
serial = "CAM-B"

[alignment]
max_hold_ms = 10
max_partials = 4

[dispatch]
ok_threshold = 0.3

[[sinks]]
name = "console"
sink_type = "log"
"#;
        let blueprint = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap();
        ConfigLoader::validate(&blueprint).unwrap();

        let engine = AlignmentEngine::new(blueprint.channel_count(), &blueprint.alignment);
        for ti in 1..=10 {
            engine.on_frame(frame(0, ti, 0));
        }
        assert_eq!(engine.pending_count(), 4);
        assert!(engine.on_frame(frame(1, 10, 0)).is_some());

        let (bus, dispatcher) = dispatcher::create_results_bus(&blueprint.sinks, 16).unwrap();
        assert_eq!(dispatcher.sink_count(), 1);
        let handle = dispatcher.spawn();
        assert!(bus.publish_status(StatusEvent::TriggerSynthetic {
            reason: "no trigger device configured".into(),
        }));
        drop(bus);

        let sinks = handle.await.unwrap();
        assert_eq!(sinks[0].0, "console");
        assert_eq!(sinks[0].1.write_count, 1);
    }
}
