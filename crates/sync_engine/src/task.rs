//! Event-driven alignment task
//!
//! Feeds frames from the capture channels into the engine and runs the
//! eviction sweep on a fixed interval, all on one tokio task.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use contracts::{AlignmentConfig, Batch, CameraFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::engine::AlignmentEngine;
use crate::stats::AlignmentSnapshot;

/// Drives an [`AlignmentEngine`] from a frame stream
#[derive(Debug)]
pub struct AlignmentTask {
    engine: Arc<AlignmentEngine>,
    sweep_interval: Duration,
}

impl AlignmentTask {
    pub fn new(engine: Arc<AlignmentEngine>, config: &AlignmentConfig) -> Self {
        Self {
            engine,
            sweep_interval: config.sweep_interval(),
        }
    }

    pub fn engine(&self) -> &Arc<AlignmentEngine> {
        &self.engine
    }

    /// Run until the frame channel closes or the batch receiver is dropped
    ///
    /// Returns the engine counters at exit.
    #[instrument(
        name = "alignment_task_run",
        skip_all,
        fields(channels = self.engine.channel_count(), sweep_ms = self.sweep_interval.as_millis() as u64)
    )]
    pub async fn run(
        self,
        frames: Receiver<CameraFrame>,
        batches: mpsc::Sender<Batch>,
    ) -> AlignmentSnapshot {
        info!("alignment task started");
        let mut sweep = interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = frames.recv() => {
                    let Ok(frame) = received else {
                        debug!("frame channel closed");
                        break;
                    };
                    if let Some(batch) = self.engine.on_frame(frame) {
                        if batches.send(batch).await.is_err() {
                            warn!("batch receiver dropped");
                            break;
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.engine.sweep();
                }
            }
        }

        // Partial state is discarded on shutdown
        let stats = self.engine.stats();
        info!(
            batches = stats.batches_emitted,
            evicted = stats.partials_evicted,
            rejected = stats.frames_rejected(),
            pending = self.engine.pending_count(),
            "alignment task stopped"
        );
        stats
    }

    pub fn spawn(
        self,
        frames: Receiver<CameraFrame>,
        batches: mpsc::Sender<Batch>,
    ) -> JoinHandle<AlignmentSnapshot> {
        tokio::spawn(self.run(frames, batches))
    }
}
