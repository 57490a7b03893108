//! # Capture
//!
//! Per-camera capture channels.
//!
//! Responsibilities:
//! - Run one acquisition loop per camera on its own thread
//! - Tag each frame with the trigger index observed at capture completion
//! - Backpressure management and drop policy
//! - Send to the alignment engine via async-channel
//! - Substitute a synthetic sensor for cameras that fail to open
//!
//! ## Usage Example
//!
//! ```ignore
//! use capture::{BackpressureConfig, CapturePipeline};
//!
//! let mut pipeline = CapturePipeline::open(
//!     &blueprint.channels,
//!     &provider,
//!     Arc::new(trigger.reader()),
//!     BackpressureConfig::default(),
//! );
//! let rx = pipeline.take_receiver().unwrap();
//! pipeline.start_all();
//! while let Ok(frame) = rx.recv().await {
//!     engine.on_frame(frame);
//! }
//! ```

mod channel;
mod config;
mod error;
mod pipeline;
mod synthetic;

pub use channel::{CaptureChannel, FrameOutlet};
pub use config::{BackpressureConfig, CaptureMetrics, CaptureMetricsSnapshot, DropPolicy};
pub use contracts::CameraFrame;
pub use error::{CaptureError, Result};
pub use pipeline::CapturePipeline;
pub use synthetic::{SyntheticFill, SyntheticSensor, SYNTHETIC_HEIGHT, SYNTHETIC_WIDTH};
