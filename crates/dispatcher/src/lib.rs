//! # Dispatcher
//!
//! Decision side of the pipeline.
//!
//! Responsibilities:
//! - Gate completed batches into the scorer, one at a time, with a bounded queue
//! - Fuse per-channel scores and write OK/NG to the result output
//! - Publish previews, decisions and status on the results bus
//! - Fan-out bus events to sinks, isolating slow observers

pub mod bus;
pub mod error;
pub mod fusion;
pub mod gate;
pub mod handle;
pub mod metrics;
pub mod scorer;
pub mod sinks;

pub use bus::{create_results_bus, BusDispatcher, ResultsBus};
pub use contracts::{InspectionEvent, ResultSink};
pub use error::{DispatcherError, Result};
pub use fusion::{decide, fuse_scores, INDETERMINATE_SCORE};
pub use gate::DispatchGate;
pub use handle::SinkHandle;
pub use metrics::{GateMetrics, GateSnapshot, MetricsSnapshot, SinkMetrics};
pub use scorer::MockScorer;
pub use sinks::{ChannelSink, LogFormat, LogSink};
