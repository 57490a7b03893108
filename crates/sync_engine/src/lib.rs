//! # Sync Engine
//!
//! Trigger-index alignment of multi-camera frames.
//!
//! Responsibilities:
//! - Collect tagged frames per trigger index
//! - Emit a `Batch` exactly once when every channel has reported
//! - Evict stale partial sets (`trigger_index < latest_complete - 1`)
//! - Refuse late and duplicate frames so evicted or emitted indices stay closed
//!
//! ## Usage Example
//!
//! ```ignore
//! use sync_engine::{AlignmentEngine, AlignmentTask};
//!
//! let engine = Arc::new(AlignmentEngine::new(blueprint.channel_count(), &blueprint.alignment));
//!
//! // Direct use
//! if let Some(batch) = engine.on_frame(frame) {
//!     // Hand off to the dispatch gate
//! }
//!
//! // Or as a task fed by the capture pipeline
//! let handle = AlignmentTask::new(engine, &blueprint.alignment).spawn(frame_rx, batch_tx);
//! ```

mod engine;
mod stats;
mod task;

pub use contracts::{AlignmentConfig, Batch, CameraFrame};
pub use engine::{Admission, AlignmentEngine, EvictedPartial, Rejection};
pub use stats::{AlignmentSnapshot, AlignmentStats};
pub use task::AlignmentTask;
