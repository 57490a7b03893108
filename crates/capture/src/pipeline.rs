//! Capture pipeline main entry

use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender};
use contracts::{CameraFrame, ChannelConfig, ChannelId, DeviceProvider, FrameSensor, IndexReader};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{CaptureChannel, FrameOutlet};
use crate::config::{BackpressureConfig, CaptureMetrics, CaptureMetricsSnapshot};
use crate::error::{CaptureError, Result};
use crate::synthetic::SyntheticSensor;

/// Capture pipeline
///
/// Owns the N capture channels and the shared frame channel they feed.
/// Channel ids are dense: the i-th registered channel is `ChannelId(i)`.
pub struct CapturePipeline {
    channels: Vec<CaptureChannel>,
    reader: Arc<dyn IndexReader>,
    tx: Sender<CameraFrame>,
    rx: Receiver<CameraFrame>,
    taken: bool,
    config: BackpressureConfig,
}

impl CapturePipeline {
    pub fn new(reader: Arc<dyn IndexReader>, config: BackpressureConfig) -> Self {
        let (tx, rx) = bounded(config.channel_capacity.max(1));
        Self {
            channels: Vec::new(),
            reader,
            tx,
            rx,
            taken: false,
            config,
        }
    }

    /// Open one camera per configured channel
    ///
    /// A camera that fails to open is replaced by a synthetic sensor and
    /// reported as disconnected; the pipeline itself never fails to build.
    #[instrument(name = "capture_pipeline_open", skip_all, fields(channels = configs.len()))]
    pub fn open(
        configs: &[ChannelConfig],
        provider: &dyn DeviceProvider,
        reader: Arc<dyn IndexReader>,
        config: BackpressureConfig,
    ) -> Self {
        let mut pipeline = Self::new(reader, config);

        for (idx, channel_config) in configs.iter().enumerate() {
            let channel_id = ChannelId(idx as u16);
            let timeout = channel_config.acquire_timeout();
            let channel = match provider.open_camera(channel_id, channel_config) {
                Ok(sensor) => {
                    info!(
                        channel_id = %channel_id,
                        serial = %channel_config.serial,
                        model = %channel_config.model,
                        "camera opened"
                    );
                    CaptureChannel::new(channel_id, sensor, timeout)
                }
                Err(e) => {
                    warn!(
                        channel_id = %channel_id,
                        serial = %channel_config.serial,
                        error = %e,
                        fps = channel_config.synthetic_fps,
                        "camera unavailable, using synthetic sensor"
                    );
                    let sensor = SyntheticSensor::new(channel_config.synthetic_fps);
                    CaptureChannel::degraded(channel_id, Box::new(sensor), timeout)
                }
            };
            pipeline.channels.push(channel);
        }

        pipeline
    }

    /// Register a channel backed by `sensor`
    ///
    /// # Errors
    /// `ChannelOrder` unless `channel_id` equals the current channel count.
    pub fn add_channel(
        &mut self,
        channel_id: ChannelId,
        sensor: Box<dyn FrameSensor>,
        acquire_timeout: std::time::Duration,
    ) -> Result<()> {
        let expected = ChannelId(self.channels.len() as u16);
        if channel_id != expected {
            return Err(CaptureError::ChannelOrder {
                expected,
                actual: channel_id,
            });
        }
        self.channels
            .push(CaptureChannel::new(channel_id, sensor, acquire_timeout));
        debug!(channel_id = %channel_id, "registered capture channel");
        Ok(())
    }

    /// Start every channel; failures are logged and skipped
    #[instrument(name = "capture_start_all", skip(self))]
    pub fn start_all(&self) {
        info!(count = self.channels.len(), "starting capture channels");
        let ledger = self.channels.iter().map(|c| c.metrics()).collect();
        let outlet = FrameOutlet::new(self.tx.clone(), &self.rx, self.config.drop_policy)
            .with_ledger(ledger);
        for channel in &self.channels {
            if channel.is_running() {
                continue;
            }
            if let Err(e) = channel.start(outlet.clone(), Arc::clone(&self.reader)) {
                error!(channel_id = %channel.channel_id(), error = %e, "failed to start channel");
            }
        }
    }

    /// Stop every channel
    #[instrument(name = "capture_stop_all", skip(self))]
    pub fn stop_all(&self) {
        debug!(count = self.channels.len(), "stopping capture channels");
        for channel in &self.channels {
            channel.stop();
        }
    }

    /// Frame stream receiver
    ///
    /// Note: Can only be called once, subsequent calls return None
    pub fn take_receiver(&mut self) -> Option<Receiver<CameraFrame>> {
        if self.taken {
            return None;
        }
        self.taken = true;
        Some(self.rx.clone())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channels running on a synthetic substitute
    pub fn degraded_channels(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|c| c.is_degraded())
            .map(|c| c.channel_id())
            .collect()
    }

    pub fn metrics(&self, channel_id: ChannelId) -> Option<Arc<CaptureMetrics>> {
        self.channels.get(channel_id.index()).map(|c| c.metrics())
    }

    /// Snapshots of every channel, in channel order
    pub fn snapshots(&self) -> Vec<(ChannelId, CaptureMetricsSnapshot)> {
        self.channels
            .iter()
            .map(|c| (c.channel_id(), c.metrics().snapshot()))
            .collect()
    }

    /// Connection watches of every channel
    pub fn connection_watchers(&self) -> Vec<(ChannelId, watch::Receiver<bool>)> {
        self.channels
            .iter()
            .map(|c| (c.channel_id(), c.subscribe_connection()))
            .collect()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop_all();
    }
}
