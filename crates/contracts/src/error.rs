//! Layered error definitions
//!
//! Categorized by source: config / device / alignment / scorer / sink

use thiserror::Error;

use crate::{ChannelId, TriggerIndex};

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Device Errors =====
    /// Device could not be opened or initialized
    #[error("device '{device}' unavailable: {message}")]
    DeviceUnavailable { device: String, message: String },

    /// Single read/write against an open device failed
    #[error("device '{device}' io error: {message}")]
    DeviceIo { device: String, message: String },

    /// Camera stopped delivering frames
    #[error("channel {channel_id} sensor disconnected: {message}")]
    SensorDisconnected {
        channel_id: ChannelId,
        message: String,
    },

    /// Raw pixel data does not match the declared geometry
    #[error("image buffer mismatch: expected {expected} bytes, got {actual}")]
    ImageSize { expected: usize, actual: usize },

    // ===== Alignment Errors =====
    /// Frames handed to batch assembly do not form a complete aligned set
    #[error("batch assembly failed for trigger {trigger_index}: {message}")]
    BatchAssembly {
        trigger_index: TriggerIndex,
        message: String,
    },

    // ===== Scorer Errors =====
    /// External scorer failed on a batch
    #[error("scorer '{scorer}' failed: {message}")]
    Scorer { scorer: String, message: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create device unavailable error
    pub fn device_unavailable(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create device io error
    pub fn device_io(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceIo {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create scorer error
    pub fn scorer(scorer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Scorer {
            scorer: scorer.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}
