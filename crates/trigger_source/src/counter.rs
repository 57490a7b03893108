//! Shared trigger counter
//!
//! Single writer (the sampler), many readers. Readers never wait on the
//! writer beyond the atomic operation itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contracts::{IndexReader, TriggerIndex};

/// Writable counter, owned by the sampling loop
#[derive(Debug, Clone, Default)]
pub struct TriggerCounter {
    value: Arc<AtomicU64>,
}

impl TriggerCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit one edge, returning the new index
    #[inline]
    pub(crate) fn advance(&self) -> TriggerIndex {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Latest committed index
    #[inline]
    pub fn current(&self) -> TriggerIndex {
        self.value.load(Ordering::Acquire)
    }

    /// Read-only handle for capture channels
    pub fn reader(&self) -> TriggerReader {
        TriggerReader {
            value: Arc::clone(&self.value),
        }
    }
}

/// Read-only view of the trigger counter
///
/// Cheap to clone; safe to call from any thread.
#[derive(Debug, Clone)]
pub struct TriggerReader {
    value: Arc<AtomicU64>,
}

impl TriggerReader {
    /// Latest committed trigger index
    #[inline]
    pub fn current_index(&self) -> TriggerIndex {
        self.value.load(Ordering::Acquire)
    }
}

impl IndexReader for TriggerReader {
    fn current_index(&self) -> TriggerIndex {
        TriggerReader::current_index(self)
    }
}
