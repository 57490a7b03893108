//! ResultSink trait - results bus output interface
//!
//! Defines the abstract interface for observers of the pipeline
//! (previews, decisions, status).

use crate::{ContractError, InspectionEvent};

/// Event output trait
///
/// All sink implementations must implement this trait.
#[trait_variant::make(ResultSink: Send)]
pub trait LocalResultSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one event
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, event: &InspectionEvent) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
