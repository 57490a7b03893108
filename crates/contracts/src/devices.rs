//! Collaborator traits - hardware and scorer abstractions
//!
//! Decouples the pipeline from the concrete digital I/O driver, camera SDK
//! and scoring backend. Real drivers and test doubles implement the same API.

use std::time::Duration;

use crate::{Batch, ChannelConfig, ChannelId, ContractError, DioConfig, RawFrame, TriggerIndex};

/// Digital I/O device (trigger input line, result output line)
///
/// Owned by a single sampler thread; calls are blocking and short.
pub trait DigitalIo: Send {
    /// Read one input bit
    fn read_bit(&mut self, port: u8, bit: u8) -> Result<bool, ContractError>;

    /// Write one output bit
    fn write_bit(&mut self, port: u8, bit: u8, value: bool) -> Result<(), ContractError>;

    /// Release the device handle
    fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

/// Read side of the trigger counter, sampled by capture channels
pub trait IndexReader: Send + Sync {
    /// Latest committed trigger index; never blocks
    fn current_index(&self) -> TriggerIndex;
}

/// Camera sensor
///
/// `acquire` is the one call in the pipeline allowed to block on hardware.
pub trait FrameSensor: Send {
    /// Wait up to `timeout` for the next frame
    ///
    /// Returns `Ok(None)` when no frame arrived in time.
    ///
    /// # Errors
    /// Returns `SensorDisconnected` / `DeviceIo` when the device is gone.
    fn acquire(&mut self, timeout: Duration) -> Result<Option<RawFrame>, ContractError>;

    /// Stop streaming and release the device
    fn close(&mut self) {}
}

/// Opens hardware collaborators at startup
///
/// Open failures are not fatal: callers substitute synthetic devices.
pub trait DeviceProvider: Send + Sync {
    /// Open the digital I/O device
    fn open_dio(&self, config: &DioConfig) -> Result<Box<dyn DigitalIo>, ContractError>;

    /// Open the camera for a channel
    fn open_camera(
        &self,
        channel_id: ChannelId,
        config: &ChannelConfig,
    ) -> Result<Box<dyn FrameSensor>, ContractError>;
}

/// Provider for machines without any hardware attached
///
/// Every open fails, so the whole pipeline runs on synthetic devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHardware;

impl DeviceProvider for NoHardware {
    fn open_dio(&self, _config: &DioConfig) -> Result<Box<dyn DigitalIo>, ContractError> {
        Err(ContractError::device_unavailable(
            "dio",
            "no hardware provider",
        ))
    }

    fn open_camera(
        &self,
        channel_id: ChannelId,
        config: &ChannelConfig,
    ) -> Result<Box<dyn FrameSensor>, ContractError> {
        Err(ContractError::device_unavailable(
            format!("{channel_id}:{}", config.serial),
            "no hardware provider",
        ))
    }
}

/// External scoring backend
///
/// Opaque capability: one anomaly score per channel (nominal 0..1).
pub trait Scorer: Send + Sync {
    /// Scorer name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Score a complete batch
    ///
    /// # Errors
    /// Any backend failure; the dispatcher turns it into a fail-safe reject.
    fn predict(&self, batch: &Batch) -> Result<Vec<f64>, ContractError>;
}

/// Binary result line written after each decision
pub trait ResultOutput: Send + Sync {
    /// Assert OK (true) or NG (false); no-op when no output line exists
    fn set_output(&self, ok: bool);
}
