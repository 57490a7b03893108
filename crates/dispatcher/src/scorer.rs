//! Built-in scorers

use contracts::{Batch, ContractError, Scorer};

/// Deterministic stand-in for a model backend
///
/// Scores every channel by its mean intensity normalized to 0..1, so a
/// bright frame reads as anomalous.
#[derive(Debug, Clone, Default)]
pub struct MockScorer;

impl MockScorer {
    pub fn new() -> Self {
        Self
    }
}

impl Scorer for MockScorer {
    fn name(&self) -> &str {
        "mock-mean-intensity"
    }

    fn predict(&self, batch: &Batch) -> Result<Vec<f64>, ContractError> {
        Ok(batch
            .frames()
            .iter()
            .map(|frame| frame.image.mean_intensity())
            .collect())
    }
}
