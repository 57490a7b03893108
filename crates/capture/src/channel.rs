//! Capture channel
//!
//! One worker thread per camera. Each acquired frame is stamped with the
//! trigger index read right after the blocking acquire returns, then pushed
//! into the shared frame channel without ever blocking on the consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use contracts::{CameraFrame, ChannelId, ContractError, FrameSensor, IndexReader};
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{CaptureMetrics, DropPolicy};
use crate::error::{CaptureError, Result};

/// Pause after a failed acquire so a broken device does not spin
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Acquire failures between repeated warnings
const WARN_EVERY_ERRORS: u64 = 100;

/// Where a channel's frames go
#[derive(Clone)]
pub struct FrameOutlet {
    pub(crate) tx: Sender<CameraFrame>,
    /// Held only for `DropOldest`, to pop the head of a full queue
    pub(crate) drain: Option<Receiver<CameraFrame>>,
    /// Metrics of every channel sharing the queue, indexed by channel id
    ledger: Arc<Vec<Arc<CaptureMetrics>>>,
}

impl FrameOutlet {
    pub fn new(tx: Sender<CameraFrame>, rx: &Receiver<CameraFrame>, policy: DropPolicy) -> Self {
        let drain = match policy {
            DropPolicy::DropOldest => Some(rx.clone()),
            DropPolicy::DropNewest => None,
        };
        Self {
            tx,
            drain,
            ledger: Arc::new(Vec::new()),
        }
    }

    /// Charge frames displaced from the shared queue to the channel that owned them
    pub fn with_ledger(mut self, ledger: Vec<Arc<CaptureMetrics>>) -> Self {
        self.ledger = Arc::new(ledger);
        self
    }

    fn metrics_of(&self, channel_id: ChannelId) -> Option<&Arc<CaptureMetrics>> {
        self.ledger.get(channel_id.index())
    }
}

/// Outcome of pushing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Sent,
    /// Sent after discarding the queue head, which belonged to the given channel
    Displaced(ChannelId),
    /// The frame did not fit; `displaced` is set when the queue head was lost as well
    Dropped { displaced: Option<ChannelId> },
    Closed,
}

/// Push a frame, applying the drop policy when the queue is full
pub(crate) fn send_frame(outlet: &FrameOutlet, frame: CameraFrame) -> SendOutcome {
    match outlet.tx.try_send(frame) {
        Ok(()) => SendOutcome::Sent,
        Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        Err(TrySendError::Full(frame)) => match &outlet.drain {
            None => SendOutcome::Dropped { displaced: None },
            Some(drain) => {
                // The consumer may have emptied a slot in between
                let displaced = drain.try_recv().ok().map(|head| head.channel_id);
                match (outlet.tx.try_send(frame), displaced) {
                    (Ok(()), Some(victim)) => SendOutcome::Displaced(victim),
                    (Ok(()), None) => SendOutcome::Sent,
                    (Err(TrySendError::Full(_)), displaced) => SendOutcome::Dropped { displaced },
                    (Err(TrySendError::Closed(_)), _) => SendOutcome::Closed,
                }
            }
        },
    }
}

/// A single camera channel
pub struct CaptureChannel {
    channel_id: ChannelId,
    sensor: Mutex<Option<Box<dyn FrameSensor>>>,
    acquire_timeout: Duration,
    degraded: bool,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<CaptureMetrics>,
    connection: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for CaptureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureChannel")
            .field("channel_id", &self.channel_id)
            .field("degraded", &self.degraded)
            .field("running", &self.is_running())
            .finish()
    }
}

impl CaptureChannel {
    /// Channel backed by a real sensor
    pub fn new(channel_id: ChannelId, sensor: Box<dyn FrameSensor>, acquire_timeout: Duration) -> Self {
        Self::build(channel_id, sensor, acquire_timeout, false)
    }

    /// Channel running on a synthetic substitute; reports disconnected
    pub fn degraded(
        channel_id: ChannelId,
        sensor: Box<dyn FrameSensor>,
        acquire_timeout: Duration,
    ) -> Self {
        Self::build(channel_id, sensor, acquire_timeout, true)
    }

    fn build(
        channel_id: ChannelId,
        sensor: Box<dyn FrameSensor>,
        acquire_timeout: Duration,
        degraded: bool,
    ) -> Self {
        let metrics = Arc::new(CaptureMetrics::new());
        metrics.set_connected(!degraded);
        let (connection, _) = watch::channel(!degraded);
        Self {
            channel_id,
            sensor: Mutex::new(Some(sensor)),
            acquire_timeout,
            degraded,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            metrics,
            connection: Arc::new(connection),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// True when running on a synthetic substitute
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> Arc<CaptureMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Connection state; `false` for synthetic substitutes and lost devices
    pub fn subscribe_connection(&self) -> watch::Receiver<bool> {
        self.connection.subscribe()
    }

    /// Start the acquisition loop on a dedicated thread
    ///
    /// # Errors
    /// `AlreadyRunning`, `SensorReleased` after a previous stop, or `Spawn`.
    #[instrument(
        name = "capture_channel_start",
        skip(self, outlet, reader),
        fields(channel_id = %self.channel_id, degraded = self.degraded)
    )]
    pub fn start(&self, outlet: FrameOutlet, reader: Arc<dyn IndexReader>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRunning {
                channel_id: self.channel_id,
            });
        }

        let Some(sensor) = lock(&self.sensor).take() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(CaptureError::SensorReleased {
                channel_id: self.channel_id,
            });
        };

        let worker = Worker {
            channel_id: self.channel_id,
            sensor,
            timeout: self.acquire_timeout,
            reader,
            outlet,
            metrics: Arc::clone(&self.metrics),
            connection: Arc::clone(&self.connection),
            running: Arc::clone(&self.running),
        };

        let spawned = thread::Builder::new()
            .name(format!("capture-{}", self.channel_id))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                debug!("capture channel started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CaptureError::Spawn {
                    channel_id: self.channel_id,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stop acquisition and release the sensor
    ///
    /// Returns within one acquire timeout plus sensor teardown.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(channel_id = %self.channel_id, "capture worker panicked");
            }
            debug!(channel_id = %self.channel_id, "capture channel stopped");
        }
    }
}

impl Drop for CaptureChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    channel_id: ChannelId,
    sensor: Box<dyn FrameSensor>,
    timeout: Duration,
    reader: Arc<dyn IndexReader>,
    outlet: FrameOutlet,
    metrics: Arc<CaptureMetrics>,
    connection: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self) {
        let channel = self.channel_id.to_string();
        let mut errors: u64 = 0;

        while self.running.load(Ordering::Relaxed) {
            match self.sensor.acquire(self.timeout) {
                Ok(Some(raw)) => {
                    // Sampled after the acquire returns: index at capture completion
                    let trigger_index = self.reader.current_index();
                    let frame = CameraFrame::tag(self.channel_id, trigger_index, raw);
                    self.metrics.record_captured();
                    counter!("capture_frames_total", "channel" => channel.clone()).increment(1);

                    match send_frame(&self.outlet, frame) {
                        SendOutcome::Sent => {
                            trace!(channel_id = %self.channel_id, trigger_index, "frame sent");
                        }
                        SendOutcome::Displaced(victim) => {
                            self.charge_drop(victim);
                            trace!(channel_id = %self.channel_id, trigger_index, %victim, "displaced queue head");
                        }
                        SendOutcome::Dropped { displaced } => {
                            self.charge_drop(self.channel_id);
                            if let Some(victim) = displaced {
                                self.charge_drop(victim);
                            }
                            trace!(channel_id = %self.channel_id, trigger_index, "frame queue full");
                        }
                        SendOutcome::Closed => {
                            debug!(channel_id = %self.channel_id, "frame channel closed");
                            break;
                        }
                    }
                }
                Ok(None) => {
                    self.metrics.record_timeout();
                }
                Err(ContractError::SensorDisconnected { message, .. }) => {
                    warn!(channel_id = %self.channel_id, %message, "camera disconnected");
                    self.metrics.set_connected(false);
                    self.connection.send_replace(false);
                    counter!("capture_disconnects_total", "channel" => channel.clone())
                        .increment(1);
                    break;
                }
                Err(e) => {
                    errors += 1;
                    self.metrics.record_error();
                    counter!("capture_acquire_errors_total", "channel" => channel.clone())
                        .increment(1);
                    if errors == 1 || errors % WARN_EVERY_ERRORS == 0 {
                        warn!(channel_id = %self.channel_id, errors, error = %e, "acquire failed");
                    }
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        self.sensor.close();
        self.running.store(false, Ordering::SeqCst);
        info!(channel_id = %self.channel_id, "capture loop exited");
    }

    /// Count a frame lost to backpressure against the channel that produced it
    fn charge_drop(&self, owner: ChannelId) {
        let metrics = if owner == self.channel_id {
            Some(&self.metrics)
        } else {
            self.outlet.metrics_of(owner)
        };
        match metrics {
            Some(metrics) => metrics.record_dropped(),
            None => debug!(channel_id = %owner, "dropped frame of unregistered channel"),
        }
        counter!("capture_frames_dropped_total", "channel" => owner.to_string()).increment(1);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
