//! Trigger source facade
//!
//! Picks the hardware sampler or the synthetic generator at open time.
//! Consumers only see `current_index()` and `set_output()`; a mid-run
//! fallback is visible through [`TriggerSource::subscribe_mode`].

use std::fmt;

use contracts::{DeviceProvider, ResultOutput, TriggerConfig, TriggerIndex};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, instrument, trace, warn};

use crate::counter::TriggerReader;
use crate::hardware::HardwareTrigger;
use crate::synthetic::SyntheticTrigger;

/// Where trigger edges currently come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Hardware,
    Synthetic,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Hardware => write!(f, "hardware"),
            TriggerMode::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Trigger source selected at startup
#[derive(Debug)]
pub enum TriggerSource {
    Hardware(HardwareTrigger),
    Synthetic(SyntheticTrigger),
}

impl TriggerSource {
    /// Open the configured device, degrading to synthetic on any failure
    #[instrument(name = "trigger_source_open", skip_all)]
    pub fn open(config: &TriggerConfig, provider: &dyn DeviceProvider) -> Self {
        let Some(dio) = config.dio.as_ref() else {
            info!(hz = config.synthetic_hz, "no trigger device configured, using synthetic trigger");
            return Self::synthetic(config.synthetic_hz);
        };

        match provider.open_dio(dio) {
            Ok(device) => {
                info!(
                    device_index = dio.device_index,
                    port = dio.input_port,
                    bit = dio.trigger_bit,
                    "trigger device opened"
                );
                Self::Hardware(HardwareTrigger::new(dio.clone(), device, config))
            }
            Err(e) => {
                warn!(
                    device_index = dio.device_index,
                    error = %e,
                    hz = config.synthetic_hz,
                    "trigger device unavailable, using synthetic trigger"
                );
                Self::synthetic(config.synthetic_hz)
            }
        }
    }

    pub fn synthetic(hz: f64) -> Self {
        Self::Synthetic(SyntheticTrigger::new(hz))
    }

    pub fn start(&self) {
        match self {
            Self::Hardware(hw) => hw.start(),
            Self::Synthetic(syn) => syn.start(),
        }
    }

    /// Stop sampling and release the device; idempotent
    pub fn stop(&self) {
        match self {
            Self::Hardware(hw) => hw.stop(),
            Self::Synthetic(syn) => syn.stop(),
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            Self::Hardware(hw) => hw.is_running(),
            Self::Synthetic(syn) => syn.is_running(),
        }
    }

    /// Latest committed trigger index
    pub fn current_index(&self) -> TriggerIndex {
        match self {
            Self::Hardware(hw) => hw.current_index(),
            Self::Synthetic(syn) => syn.current_index(),
        }
    }

    /// Reader handle for capture channels
    pub fn reader(&self) -> TriggerReader {
        match self {
            Self::Hardware(hw) => hw.reader(),
            Self::Synthetic(syn) => syn.reader(),
        }
    }

    pub fn mode(&self) -> TriggerMode {
        match self {
            Self::Hardware(hw) => hw.mode(),
            Self::Synthetic(_) => TriggerMode::Synthetic,
        }
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<TriggerMode> {
        match self {
            Self::Hardware(hw) => hw.subscribe_mode(),
            Self::Synthetic(syn) => syn.subscribe_mode(),
        }
    }
}

impl ResultOutput for TriggerSource {
    fn set_output(&self, ok: bool) {
        match self {
            Self::Hardware(hw) => hw.set_output(ok),
            Self::Synthetic(_) => trace!(ok, "synthetic trigger has no result line"),
        }
    }
}
