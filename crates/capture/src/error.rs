//! Capture error types

use contracts::ChannelId;
use thiserror::Error;

/// Capture error
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Channel already streaming
    #[error("channel {channel_id} is already running")]
    AlreadyRunning {
        /// Channel ID
        channel_id: ChannelId,
    },

    /// Sensor was released by a previous run
    #[error("channel {channel_id} has no sensor, it was released on stop")]
    SensorReleased {
        /// Channel ID
        channel_id: ChannelId,
    },

    /// Worker thread could not be spawned
    #[error("failed to spawn worker for channel {channel_id}: {message}")]
    Spawn {
        /// Channel ID
        channel_id: ChannelId,
        /// Error message
        message: String,
    },

    /// Channel ids must be registered in order 0..N
    #[error("expected channel {expected}, got {actual}")]
    ChannelOrder {
        /// Next id the pipeline expects
        expected: ChannelId,
        /// Id that was registered
        actual: ChannelId,
    },
}

/// Capture Result type alias
pub type Result<T> = std::result::Result<T, CaptureError>;
