//! CameraFrame - Capture output
//!
//! Trigger-tagged camera frame and its pixel buffer.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Rising-edge count observed on the trigger line.
///
/// Non-decreasing for the lifetime of the process, never reused.
pub type TriggerIndex = u64;

/// Camera channel identifier (position of the channel in the configuration)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChannelId(pub u16);

impl ChannelId {
    /// Slot index for per-channel arrays
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u16> for ChannelId {
    #[inline]
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.0)
    }
}

/// Pixel layout of an image buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Mono8,
    Mono16,
    Rgb8,
    Bgra8,
}

impl PixelFormat {
    /// Number of color channels per pixel
    pub fn channels(self) -> u8 {
        match self {
            Self::Mono8 | Self::Mono16 => 1,
            Self::Rgb8 => 3,
            Self::Bgra8 => 4,
        }
    }

    /// Bits per channel sample
    pub fn bit_depth(self) -> u8 {
        match self {
            Self::Mono16 => 16,
            _ => 8,
        }
    }

    /// Bytes per pixel
    pub fn bytes_per_pixel(self) -> usize {
        self.channels() as usize * (self.bit_depth() as usize / 8)
    }
}

/// Owned, immutable pixel buffer
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Pixel layout (channel count and bit depth)
    pub format: PixelFormat,

    /// Raw pixel data, row-major, tightly packed
    pub data: Bytes,
}

impl ImageBuffer {
    /// Create a buffer, checking that `data` matches the declared geometry
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Bytes,
    ) -> Result<Self, ContractError> {
        let expected = Self::expected_len(width, height, format);
        if data.len() != expected {
            return Err(ContractError::ImageSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Byte length of a tightly packed buffer with this geometry
    pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn channels(&self) -> u8 {
        self.format.channels()
    }

    pub fn bit_depth(&self) -> u8 {
        self.format.bit_depth()
    }

    /// Mean sample value normalized to 0..1
    pub fn mean_intensity(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        match self.format.bit_depth() {
            16 => {
                let samples = self.data.chunks_exact(2);
                let count = samples.len().max(1) as f64;
                let sum: f64 = samples
                    .map(|s| u16::from_le_bytes([s[0], s[1]]) as f64)
                    .sum();
                sum / count / u16::MAX as f64
            }
            _ => {
                let sum: u64 = self.data.iter().map(|&b| b as u64).sum();
                sum as f64 / self.data.len() as f64 / u8::MAX as f64
            }
        }
    }
}

/// Frame as delivered by the sensor collaborator, before trigger tagging
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Pixel data
    pub image: ImageBuffer,

    /// Device clock value reported by the sensor, if any
    pub device_timestamp: Option<u64>,
}

/// Trigger-tagged camera frame
///
/// Created by a capture channel the moment a raw frame is received.
/// Immutable after creation; moved channel → alignment → dispatch.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Producing channel
    pub channel_id: ChannelId,

    /// Trigger index observed at capture completion
    pub trigger_index: TriggerIndex,

    /// Device clock value, if the sensor reports one
    pub hardware_timestamp: Option<u64>,

    /// Monotonic host time at capture completion
    pub host_timestamp: Instant,

    /// Pixel data
    pub image: ImageBuffer,
}

impl CameraFrame {
    /// Tag a raw sensor frame
    pub fn tag(channel_id: ChannelId, trigger_index: TriggerIndex, raw: RawFrame) -> Self {
        Self {
            channel_id,
            trigger_index,
            hardware_timestamp: raw.device_timestamp,
            host_timestamp: Instant::now(),
            image: raw.image,
        }
    }
}
