//! InspectionBlueprint - Config Loader output
//!
//! Describes the complete line configuration: trigger I/O, camera channels,
//! alignment policy, dispatch policy and result sinks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{ChannelId, PixelFormat};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete inspection line blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Trigger source settings
    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Camera channels; channel id = position in this list
    pub channels: Vec<ChannelConfig>,

    /// Alignment engine settings
    #[serde(default)]
    pub alignment: AlignmentConfig,

    /// Dispatch gate settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Results bus sinks
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl InspectionBlueprint {
    /// Number of channels N
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channels paired with their ids
    pub fn channels_with_ids(&self) -> impl Iterator<Item = (ChannelId, &ChannelConfig)> {
        self.channels
            .iter()
            .enumerate()
            .map(|(idx, cfg)| (ChannelId(idx as u16), cfg))
    }
}

/// Trigger source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Digital I/O device; `None` runs the synthetic generator
    #[serde(default)]
    pub dio: Option<DioConfig>,

    /// Synthetic generator rate (Hz)
    #[serde(default = "default_synthetic_hz")]
    pub synthetic_hz: f64,

    /// Consecutive failed reads before the device is treated as disconnected
    #[serde(default = "default_disconnect_after_errors")]
    pub disconnect_after_errors: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            dio: None,
            synthetic_hz: default_synthetic_hz(),
            disconnect_after_errors: default_disconnect_after_errors(),
        }
    }
}

fn default_synthetic_hz() -> f64 {
    20.0
}

fn default_disconnect_after_errors() -> u32 {
    200
}

/// Digital I/O device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DioConfig {
    /// Device index on the host
    #[serde(default)]
    pub device_index: u32,

    /// Input port carrying the trigger line
    #[serde(default)]
    pub input_port: u8,

    /// Bit of the trigger line on `input_port`
    #[serde(default)]
    pub trigger_bit: u8,

    /// Output port for the OK/NG line
    #[serde(default)]
    pub output_port: Option<u8>,

    /// Bit of the OK/NG line on `output_port`
    #[serde(default)]
    pub ok_bit: Option<u8>,

    /// Edge sampling rate (Hz)
    #[serde(default = "default_poll_hz")]
    pub poll_hz: f64,
}

impl Default for DioConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            input_port: 0,
            trigger_bit: 0,
            output_port: None,
            ok_bit: None,
            poll_hz: default_poll_hz(),
        }
    }
}

impl DioConfig {
    /// Minimum sampling period
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_micros(500);

    /// Sampling period derived from `poll_hz`, floored at 0.5 ms
    pub fn poll_interval(&self) -> Duration {
        let hz = if self.poll_hz > 0.0 {
            self.poll_hz
        } else {
            default_poll_hz()
        };
        Duration::from_secs_f64(1.0 / hz).max(Self::MIN_POLL_INTERVAL)
    }

    /// Output line, when both port and bit are configured
    pub fn output_line(&self) -> Option<(u8, u8)> {
        self.output_port.zip(self.ok_bit)
    }
}

fn default_poll_hz() -> f64 {
    2000.0
}

/// Camera channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Device serial number
    pub serial: String,

    /// Camera model
    #[serde(default = "default_model")]
    pub model: String,

    /// Resolution [width, height]
    #[serde(default = "default_resolution")]
    pub resolution: [u32; 2],

    /// Pixel format
    #[serde(default)]
    pub pixel_format: PixelFormat,

    /// Exposure time (µs)
    #[serde(default = "default_exposure_us")]
    pub exposure_us: u32,

    /// Gain (dB)
    #[serde(default)]
    pub gain_db: f64,

    /// Camera trigger selector
    #[serde(default = "default_trigger_selector")]
    pub trigger_selector: String,

    /// Camera trigger mode
    #[serde(default = "default_trigger_mode")]
    pub trigger_mode: String,

    /// Frame rate of the synthetic substitute (Hz)
    #[serde(default = "default_synthetic_fps")]
    pub synthetic_fps: f64,

    /// Upper bound of a single blocking acquire (ms)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Extra driver attributes
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl ChannelConfig {
    /// Channel with defaults for everything but the serial
    pub fn with_serial(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            model: default_model(),
            resolution: default_resolution(),
            pixel_format: PixelFormat::default(),
            exposure_us: default_exposure_us(),
            gain_db: 0.0,
            trigger_selector: default_trigger_selector(),
            trigger_mode: default_trigger_mode(),
            synthetic_fps: default_synthetic_fps(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            attributes: HashMap::new(),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms.max(1))
    }
}

fn default_model() -> String {
    "DFK 33UX287".to_string()
}

fn default_resolution() -> [u32; 2] {
    [1920, 1200]
}

fn default_exposure_us() -> u32 {
    2000
}

fn default_trigger_selector() -> String {
    "FrameStart".to_string()
}

fn default_trigger_mode() -> String {
    "On".to_string()
}

fn default_synthetic_fps() -> f64 {
    20.0
}

fn default_acquire_timeout_ms() -> u64 {
    100
}

/// Alignment engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Maximum hold duration of a partial set (ms); sweeps run at half of it
    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: u64,

    /// Hard cap on retained partial sets
    #[serde(default = "default_max_partials")]
    pub max_partials: usize,

    /// Capacity of the frame channel from the capture workers
    #[serde(default = "default_frame_queue")]
    pub frame_queue: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            max_hold_ms: default_max_hold_ms(),
            max_partials: default_max_partials(),
            frame_queue: default_frame_queue(),
        }
    }
}

impl AlignmentConfig {
    /// Eviction sweep interval: half the hold duration, at least 1 ms
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis((self.max_hold_ms / 2).max(1))
    }
}

fn default_max_hold_ms() -> u64 {
    8
}

fn default_max_partials() -> usize {
    64
}

fn default_frame_queue() -> usize {
    256
}

/// Dispatch gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Accept when fused score is strictly below this value
    #[serde(default = "default_ok_threshold")]
    pub ok_threshold: f64,

    /// Batches waiting behind the one in flight
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,

    /// Order in which queued batches are taken
    #[serde(default)]
    pub queue_policy: QueuePolicy,

    /// Publish per-channel previews on the results bus
    #[serde(default = "default_true")]
    pub publish_previews: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ok_threshold: default_ok_threshold(),
            queue_bound: default_queue_bound(),
            queue_policy: QueuePolicy::default(),
            publish_previews: true,
        }
    }
}

fn default_ok_threshold() -> f64 {
    0.5
}

fn default_queue_bound() -> usize {
    2
}

fn default_true() -> bool {
    true
}

/// Queue service order while the scorer is busy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Serve the newest queued batch first; overflow drops the oldest
    #[default]
    NewestFirst,
    /// Serve in arrival order; overflow drops the oldest
    Fifo,
}

/// Results bus sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Sink name
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Structured log lines via tracing
    Log,
}
