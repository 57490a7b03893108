//! # Trigger Source
//!
//! Hardware trigger-edge counter.
//!
//! Responsibilities:
//! - Sample the trigger input line and count rising edges (`TriggerIndex`)
//! - Lock-free `current_index()` for any number of readers
//! - OK/NG result line write-back
//! - Transparent fallback to a synthetic generator when the device is
//!   absent, fails to open, or disconnects mid-run
//!
//! ## Usage Example
//!
//! ```ignore
//! use trigger_source::TriggerSource;
//!
//! let source = TriggerSource::open(&blueprint.trigger, &provider);
//! source.start();
//! let reader = source.reader();
//! let idx = reader.current_index();
//! source.set_output(true);
//! source.stop();
//! ```

mod counter;
mod edge;
mod hardware;
pub mod mock;
mod sampler;
mod source;
mod synthetic;

pub use contracts::{DigitalIo, DioConfig, IndexReader, ResultOutput, TriggerConfig, TriggerIndex};
pub use counter::{TriggerCounter, TriggerReader};
pub use edge::EdgeDetector;
pub use hardware::HardwareTrigger;
pub use mock::{MockDio, MockDioHandle};
pub use source::{TriggerMode, TriggerSource};
pub use synthetic::SyntheticTrigger;
