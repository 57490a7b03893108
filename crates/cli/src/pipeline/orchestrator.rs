//! Pipeline orchestrator - coordinates all components.
//!
//! Wiring: trigger source → capture channels → alignment task →
//! dispatch gate → result output + results bus.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use capture::{BackpressureConfig, CapturePipeline, DropPolicy};
use contracts::{
    ChannelId, DeviceProvider, IndexReader, InspectionBlueprint, NoHardware, ResultOutput, Scorer,
    StatusEvent,
};
use dispatcher::{DispatchGate, MockScorer, ResultsBus};
use sync_engine::{AlignmentEngine, AlignmentTask};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use trigger_source::{TriggerMode, TriggerSource};

use super::PipelineStats;

/// Grace period for sinks to drain at shutdown
const BUS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The line blueprint
    pub blueprint: InspectionBlueprint,

    /// Stop after this many decisions (None = unlimited)
    pub max_batches: Option<u64>,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Buffer size of the batch and results bus queues
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    provider: Box<dyn DeviceProvider>,
    scorer: Arc<dyn Scorer>,
}

impl Pipeline {
    /// Pipeline without device drivers: every device runs synthetic and
    /// batches are scored by the mock scorer
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            provider: Box::new(NoHardware),
            scorer: Arc::new(MockScorer::new()),
        }
    }

    /// Run the pipeline until a stop condition is met
    ///
    /// Stops on `shutdown`, on timeout, after `max_batches` decisions, or
    /// when a pipeline stage ends on its own.
    pub async fn run<F>(self, shutdown: F) -> Result<PipelineStats>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let Self {
            config,
            provider,
            scorer,
        } = self;
        let blueprint = &config.blueprint;

        if let Some(port) = config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Results bus
        if blueprint.sinks.is_empty() {
            warn!("No sinks configured - results bus events will be discarded");
        }
        let (bus, bus_dispatcher) =
            dispatcher::create_results_bus(&blueprint.sinks, config.buffer_size)
                .context("Failed to create results bus")?;
        let active_sinks = bus_dispatcher.sink_count();
        let bus_handle = bus_dispatcher.spawn();

        // Trigger source
        let trigger = Arc::new(TriggerSource::open(&blueprint.trigger, provider.as_ref()));
        let startup_reason = if blueprint.trigger.dio.is_some() {
            "trigger device unavailable"
        } else {
            "no trigger device configured"
        };
        let mut watchers = vec![spawn_trigger_mode_watcher(
            trigger.subscribe_mode(),
            bus.clone(),
            startup_reason,
        )];

        // Capture channels
        let reader: Arc<dyn IndexReader> = Arc::new(trigger.reader());
        let mut capture = CapturePipeline::open(
            &blueprint.channels,
            provider.as_ref(),
            reader,
            BackpressureConfig::new(blueprint.alignment.frame_queue, DropPolicy::DropOldest),
        );
        let frames = capture
            .take_receiver()
            .context("Failed to get capture receiver")?;
        for (channel_id, rx) in capture.connection_watchers() {
            watchers.push(spawn_connection_watcher(channel_id, rx, bus.clone()));
        }
        let channel_count = capture.channel_count();
        let degraded_channels = capture.degraded_channels();

        // Alignment
        let (evict_tx, mut evict_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(
            AlignmentEngine::new(channel_count, &blueprint.alignment)
                .with_eviction_listener(evict_tx),
        );
        let (batch_tx, mut batch_rx) = mpsc::channel(config.buffer_size.max(1));
        let alignment_handle =
            AlignmentTask::new(Arc::clone(&engine), &blueprint.alignment).spawn(frames.clone(), batch_tx);

        // Dispatch gate
        let output: Arc<dyn ResultOutput> = trigger.clone();
        let gate = DispatchGate::new(scorer, output, bus.clone(), blueprint.dispatch.clone());
        let mut decisions = gate.subscribe_decisions();
        let (gate_tx, gate_rx) = mpsc::channel(config.buffer_size.max(1));
        let gate_handle = gate.spawn(gate_rx);

        // Sources start last so no frame outruns its consumers
        capture.start_all();
        trigger.start();

        info!(
            channels = channel_count,
            synthetic_channels = degraded_channels.len(),
            trigger_mode = %trigger.mode(),
            sinks = active_sinks,
            max_batches = ?config.max_batches,
            "Pipeline running"
        );

        let mut stats = PipelineStats {
            active_channels: channel_count,
            degraded_channels,
            active_sinks,
            ..Default::default()
        };

        let timeout = config.timeout;
        let deadline = async move {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                received = batch_rx.recv() => {
                    let Some(batch) = received else {
                        warn!("Alignment task ended");
                        break;
                    };
                    stats.batches += 1;
                    stats.inspection.update_batch(&batch);
                    trace!(
                        trigger_index = batch.trigger_index(),
                        skew_ms = batch.capture_skew_ms(),
                        "Batch forwarded to gate"
                    );
                    if gate_tx.send(batch).await.is_err() {
                        warn!("Dispatch gate closed");
                        break;
                    }
                }
                Some(evicted) = evict_rx.recv() => {
                    stats.inspection.update_eviction(&evicted.missing);
                }
                decided = decisions.recv() => match decided {
                    Ok(decision) => {
                        stats.decisions += 1;
                        stats.inspection.update_decision(&decision);
                        if let Some(max) = config.max_batches {
                            if stats.decisions >= max {
                                info!(decisions = stats.decisions, "Reached max batches limit");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Decision stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Dispatch gate ended");
                        break;
                    }
                },
                _ = &mut deadline => {
                    warn!(timeout_secs = timeout.map(|t| t.as_secs()), "Pipeline timed out");
                    break;
                }
                _ = &mut shutdown => {
                    warn!("Received shutdown signal, stopping pipeline...");
                    break;
                }
            }
        }

        // Shutdown: sources first, then drain stage by stage
        info!("Shutting down pipeline...");
        trigger.stop();
        capture.stop_all();
        frames.close();

        stats.alignment = alignment_handle
            .await
            .context("Alignment task panicked")?;

        let mut discarded = 0usize;
        while batch_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "Discarded batches completed during shutdown");
        }

        drop(gate_tx);
        stats.gate = gate_handle.await.context("Dispatch gate panicked")?;
        while let Ok(decision) = decisions.try_recv() {
            stats.decisions += 1;
            stats.inspection.update_decision(&decision);
        }
        while let Ok(evicted) = evict_rx.try_recv() {
            stats.inspection.update_eviction(&evicted.missing);
        }
        stats.inspection.queue_drops = stats.gate.batches_dropped;

        for watcher in watchers {
            watcher.abort();
        }
        stats.bus_dropped = bus.dropped_count();
        drop(bus);
        match tokio::time::timeout(BUS_DRAIN_TIMEOUT, bus_handle).await {
            Ok(Ok(sinks)) => stats.sinks = sinks,
            Ok(Err(e)) => warn!(error = %e, "Results bus task panicked"),
            Err(_) => warn!("Results bus did not drain in time"),
        }

        stats.capture = capture.snapshots();
        stats.final_trigger_index = trigger.current_index();
        stats.trigger_mode = trigger.mode();
        stats.duration = start_time.elapsed();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            throughput = format!("{:.2}", stats.throughput()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

/// Publish every connection change of one channel, starting with its current state
fn spawn_connection_watcher(
    channel_id: ChannelId,
    mut rx: watch::Receiver<bool>,
    bus: ResultsBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let connected = *rx.borrow_and_update();
            bus.publish_status(StatusEvent::ChannelConnection {
                channel_id,
                connected,
            });
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Publish when the trigger source runs on the synthetic generator
fn spawn_trigger_mode_watcher(
    mut rx: watch::Receiver<TriggerMode>,
    bus: ResultsBus,
    startup_reason: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reason = startup_reason;
        loop {
            if *rx.borrow_and_update() == TriggerMode::Synthetic {
                bus.publish_status(StatusEvent::TriggerSynthetic {
                    reason: reason.to_string(),
                });
            }
            if rx.changed().await.is_err() {
                break;
            }
            reason = "trigger device disconnected";
        }
    })
}
