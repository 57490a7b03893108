//! Batch - Sync Engine output, Decision - Dispatcher output
//!
//! Aligned frame sets and the events published to observers.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::{CameraFrame, ChannelId, ContractError, ImageBuffer, TriggerIndex};

/// Complete, trigger-aligned set of frames
///
/// Exactly one frame per channel, ordered by channel id ascending,
/// all sharing one trigger index. Immutable once assembled.
#[derive(Debug, Clone)]
pub struct Batch {
    trigger_index: TriggerIndex,
    frames: Vec<CameraFrame>,
    completed_at: Instant,
}

impl Batch {
    /// Assemble a batch from frames already ordered by channel id
    ///
    /// # Errors
    /// Returns `BatchAssembly` if the frames are empty, carry a different
    /// trigger index, or are not exactly channels `0..frames.len()` in order.
    pub fn assemble(
        trigger_index: TriggerIndex,
        frames: Vec<CameraFrame>,
    ) -> Result<Self, ContractError> {
        if frames.is_empty() {
            return Err(ContractError::BatchAssembly {
                trigger_index,
                message: "no frames".into(),
            });
        }
        for (slot, frame) in frames.iter().enumerate() {
            if frame.trigger_index != trigger_index {
                return Err(ContractError::BatchAssembly {
                    trigger_index,
                    message: format!(
                        "{} carries trigger {}",
                        frame.channel_id, frame.trigger_index
                    ),
                });
            }
            if frame.channel_id.index() != slot {
                return Err(ContractError::BatchAssembly {
                    trigger_index,
                    message: format!("slot {slot} holds {}", frame.channel_id),
                });
            }
        }
        Ok(Self {
            trigger_index,
            frames,
            completed_at: Instant::now(),
        })
    }

    pub fn trigger_index(&self) -> TriggerIndex {
        self.trigger_index
    }

    /// Frames ordered by channel id
    pub fn frames(&self) -> &[CameraFrame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<CameraFrame> {
        self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Host time at which the last member arrived
    pub fn completed_at(&self) -> Instant {
        self.completed_at
    }

    /// Spread between the earliest and latest capture in the batch (ms)
    pub fn capture_skew_ms(&self) -> f64 {
        let first = self.frames.iter().map(|f| f.host_timestamp).min();
        let last = self.frames.iter().map(|f| f.host_timestamp).max();
        match (first, last) {
            (Some(first), Some(last)) => last.duration_since(first).as_secs_f64() * 1000.0,
            _ => 0.0,
        }
    }
}

/// How a decision was reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DecisionOutcome {
    /// Scorer returned one score per channel
    Scored,
    /// Scorer failed or returned unusable output; decision is fail-safe reject
    Indeterminate { reason: String },
}

/// Inspection decision for one trigger index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Inspected cycle
    pub trigger_index: TriggerIndex,

    /// One anomaly score per channel (channel id order)
    pub per_channel_scores: Vec<f64>,

    /// Worst-case (max) of the per-channel scores
    pub fused_score: f64,

    /// `fused_score < threshold`, false when indeterminate
    pub accept: bool,

    /// Scored or indeterminate
    pub outcome: DecisionOutcome,

    /// Scorer wall time (ms)
    pub latency_ms: f64,
}

impl Decision {
    pub fn is_indeterminate(&self) -> bool {
        matches!(self.outcome, DecisionOutcome::Indeterminate { .. })
    }
}

/// Preview of one channel's frame for a trigger index
#[derive(Debug, Clone)]
pub struct PreviewEvent {
    pub trigger_index: TriggerIndex,
    pub channel_id: ChannelId,
    /// Observer-owned handle to the pixel data
    pub image: ImageBuffer,
}

/// Generic pipeline status updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StatusEvent {
    /// Camera connection state changed
    ChannelConnection { channel_id: ChannelId, connected: bool },
    /// Trigger source is running on the synthetic generator
    TriggerSynthetic { reason: String },
    /// Completed batch dropped by the dispatch queue
    BatchDropped { trigger_index: TriggerIndex },
}

/// Event published on the results bus
#[derive(Debug, Clone)]
pub enum InspectionEvent {
    Preview(PreviewEvent),
    Decision(Decision),
    Status(StatusEvent),
}

impl InspectionEvent {
    /// Trigger index the event refers to, if any
    pub fn trigger_index(&self) -> Option<TriggerIndex> {
        match self {
            Self::Preview(p) => Some(p.trigger_index),
            Self::Decision(d) => Some(d.trigger_index),
            Self::Status(StatusEvent::BatchDropped { trigger_index }) => Some(*trigger_index),
            Self::Status(_) => None,
        }
    }
}
