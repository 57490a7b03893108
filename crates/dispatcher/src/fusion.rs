//! Score fusion and accept/reject decision

use std::time::Duration;

use contracts::{ContractError, Decision, DecisionOutcome, TriggerIndex};

/// Fused score reported for indeterminate decisions
pub const INDETERMINATE_SCORE: f64 = 1.0;

/// Worst-case fusion: the maximum per-channel score
///
/// `None` for an empty slice or when any score is not finite.
pub fn fuse_scores(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() || scores.iter().any(|s| !s.is_finite()) {
        return None;
    }
    scores.iter().copied().reduce(f64::max)
}

/// Turn a scorer result into a decision
///
/// Accepts only when every expected channel produced a finite score and the
/// fused score is strictly below `threshold`. Anything else is an
/// indeterminate reject.
pub fn decide(
    trigger_index: TriggerIndex,
    expected_channels: usize,
    result: Result<Vec<f64>, ContractError>,
    threshold: f64,
    latency: Duration,
) -> Decision {
    let latency_ms = latency.as_secs_f64() * 1000.0;
    let indeterminate = |scores: Vec<f64>, reason: String| Decision {
        trigger_index,
        per_channel_scores: scores,
        fused_score: INDETERMINATE_SCORE,
        accept: false,
        outcome: DecisionOutcome::Indeterminate { reason },
        latency_ms,
    };

    let scores = match result {
        Ok(scores) => scores,
        Err(e) => return indeterminate(Vec::new(), e.to_string()),
    };
    if scores.len() != expected_channels {
        let reason = format!(
            "expected {expected_channels} scores, got {}",
            scores.len()
        );
        return indeterminate(scores, reason);
    }
    let Some(fused) = fuse_scores(&scores) else {
        return indeterminate(scores, "non-finite score".to_string());
    };

    Decision {
        trigger_index,
        per_channel_scores: scores,
        fused_score: fused,
        accept: fused < threshold,
        outcome: DecisionOutcome::Scored,
        latency_ms,
    }
}
