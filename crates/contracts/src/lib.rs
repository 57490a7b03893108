//! # Contracts
//!
//! Frozen interface contracts shared by every pipeline crate: frame and batch
//! data structures, collaborator traits (digital I/O, camera sensor, scorer,
//! result sink) and the configuration blueprint.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - `TriggerIndex` (u64 edge count) is the only cross-channel clock
//! - Host timestamps are monotonic `Instant`s, used for latency diagnostics only

mod batch;
mod blueprint;
mod devices;
mod error;
mod frame;
mod sink;

pub use batch::*;
pub use blueprint::*;
pub use devices::*;
pub use error::*;
pub use frame::*;
pub use sink::*;
