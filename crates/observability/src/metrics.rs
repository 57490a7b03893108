//! Inspection pipeline metrics
//!
//! Thin helpers over the `metrics` facade plus an in-memory aggregator
//! for the end-of-run summary.

use std::collections::BTreeMap;

use contracts::{Batch, ChannelId, Decision, TriggerIndex};
use metrics::{counter, gauge, histogram};

/// Record a completed batch
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_batch_emitted;
///
/// if let Some(batch) = engine.on_frame(frame) {
///     record_batch_emitted(&batch);
/// }
/// ```
pub fn record_batch_emitted(batch: &Batch) {
    counter!("trigger_sync_batches_total").increment(1);
    gauge!("trigger_sync_last_batch_index").set(batch.trigger_index() as f64);
    histogram!("trigger_sync_capture_skew_ms").record(batch.capture_skew_ms());
}

/// Record a partial set dropped by eviction
pub fn record_partial_evicted(missing: &[ChannelId]) {
    counter!("trigger_sync_partials_evicted_total").increment(1);
    for channel_id in missing {
        counter!(
            "trigger_sync_channel_missing_total",
            "channel" => channel_id.to_string()
        )
        .increment(1);
    }
}

/// Record a frame refused by the alignment engine
pub fn record_frame_rejected(reason: &'static str) {
    counter!("trigger_sync_frames_rejected_total", "reason" => reason).increment(1);
}

/// Record the number of pending partial sets
pub fn record_pending_partials(count: usize) {
    gauge!("trigger_sync_pending_partials").set(count as f64);
}

/// Record an inspection decision
pub fn record_decision(decision: &Decision) {
    let outcome = if decision.is_indeterminate() {
        "indeterminate"
    } else if decision.accept {
        "accept"
    } else {
        "reject"
    };
    counter!("trigger_sync_decisions_total", "outcome" => outcome).increment(1);
    histogram!("trigger_sync_fused_score").record(decision.fused_score);
}

/// Record scorer wall time for one batch
pub fn record_scorer_latency_ms(scorer: &str, latency_ms: f64) {
    histogram!(
        "trigger_sync_scorer_latency_ms",
        "scorer" => scorer.to_string()
    )
    .record(latency_ms);
}

/// Record a batch dropped by the dispatch queue
pub fn record_queue_drop(trigger_index: TriggerIndex) {
    counter!("trigger_sync_dispatch_dropped_total").increment(1);
    gauge!("trigger_sync_last_dropped_index").set(trigger_index as f64);
}

/// Record a results bus sink write
pub fn record_sink_write(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "trigger_sync_sink_writes_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Inspection metrics aggregator
///
/// Aggregates in memory for the summary printed at shutdown.
#[derive(Debug, Clone, Default)]
pub struct InspectionMetricsAggregator {
    pub total_batches: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub indeterminate: u64,
    pub evicted_partials: u64,
    pub queue_drops: u64,

    /// Capture spread inside a batch (ms)
    pub skew_stats: RunningStats,

    /// Scorer wall time (ms)
    pub latency_stats: RunningStats,

    pub fused_stats: RunningStats,

    /// Evictions in which each channel was missing
    pub missing_counts: BTreeMap<ChannelId, u64>,
}

impl InspectionMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_batch(&mut self, batch: &Batch) {
        self.total_batches += 1;
        self.skew_stats.push(batch.capture_skew_ms());
    }

    pub fn update_decision(&mut self, decision: &Decision) {
        if decision.is_indeterminate() {
            self.indeterminate += 1;
        } else {
            self.fused_stats.push(decision.fused_score);
        }
        if decision.accept {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
        self.latency_stats.push(decision.latency_ms);
    }

    pub fn update_eviction(&mut self, missing: &[ChannelId]) {
        self.evicted_partials += 1;
        for channel_id in missing {
            *self.missing_counts.entry(*channel_id).or_insert(0) += 1;
        }
    }

    pub fn update_queue_drop(&mut self) {
        self.queue_drops += 1;
    }

    pub fn summary(&self) -> InspectionSummary {
        let decisions = self.accepted + self.rejected;
        InspectionSummary {
            total_batches: self.total_batches,
            decisions,
            accepted: self.accepted,
            rejected: self.rejected,
            indeterminate: self.indeterminate,
            evicted_partials: self.evicted_partials,
            queue_drops: self.queue_drops,
            accept_rate: percent(self.accepted, decisions),
            eviction_rate: percent(
                self.evicted_partials,
                self.total_batches + self.evicted_partials,
            ),
            capture_skew_ms: StatsSummary::from(&self.skew_stats),
            scorer_latency_ms: StatsSummary::from(&self.latency_stats),
            fused_score: StatsSummary::from(&self.fused_stats),
            channel_missing_counts: self.missing_counts.clone(),
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct InspectionSummary {
    pub total_batches: u64,
    pub decisions: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub indeterminate: u64,
    pub evicted_partials: u64,
    pub queue_drops: u64,
    pub accept_rate: f64,
    pub eviction_rate: f64,
    pub capture_skew_ms: StatsSummary,
    pub scorer_latency_ms: StatsSummary,
    pub fused_score: StatsSummary,
    pub channel_missing_counts: BTreeMap<ChannelId, u64>,
}

impl std::fmt::Display for InspectionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Inspection Summary ===")?;
        writeln!(f, "Batches: {}", self.total_batches)?;
        writeln!(
            f,
            "Decisions: {} (accept {}, reject {}, {:.2}% accepted)",
            self.decisions, self.accepted, self.rejected, self.accept_rate
        )?;
        writeln!(f, "Indeterminate: {}", self.indeterminate)?;
        writeln!(
            f,
            "Evicted partials: {} ({:.2}%)",
            self.evicted_partials, self.eviction_rate
        )?;
        writeln!(f, "Dispatch queue drops: {}", self.queue_drops)?;
        writeln!(f, "Capture skew (ms): {}", self.capture_skew_ms)?;
        writeln!(f, "Scorer latency (ms): {}", self.scorer_latency_ms)?;
        writeln!(f, "Fused score: {}", self.fused_score)?;

        if !self.channel_missing_counts.is_empty() {
            writeln!(f, "Missing channel counts:")?;
            for (channel, count) in &self.channel_missing_counts {
                writeln!(f, "  {}: {}", channel, count)?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DecisionOutcome;

    fn decision(fused: f64, accept: bool, outcome: DecisionOutcome) -> Decision {
        Decision {
            trigger_index: 1,
            per_channel_scores: vec![fused],
            fused_score: fused,
            accept,
            outcome,
            latency_ms: 4.0,
        }
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_running_stats_ignores_nan() {
        let mut stats = RunningStats::default();
        stats.push(f64::NAN);
        stats.push(2.0);
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.mean(), 2.0);
    }

    #[test]
    fn test_aggregator_decisions() {
        let mut agg = InspectionMetricsAggregator::new();
        agg.update_decision(&decision(0.2, true, DecisionOutcome::Scored));
        agg.update_decision(&decision(0.7, false, DecisionOutcome::Scored));
        agg.update_decision(&decision(
            1.0,
            false,
            DecisionOutcome::Indeterminate {
                reason: "scorer failed".into(),
            },
        ));

        let summary = agg.summary();
        assert_eq!(summary.decisions, 3);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.indeterminate, 1);
        assert_eq!(summary.fused_score.count, 2);
        assert!((summary.accept_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregator_evictions() {
        let mut agg = InspectionMetricsAggregator::new();
        agg.update_eviction(&[ChannelId(3)]);
        agg.update_eviction(&[ChannelId(3), ChannelId(1)]);
        agg.update_queue_drop();

        assert_eq!(agg.evicted_partials, 2);
        assert_eq!(agg.missing_counts.get(&ChannelId(3)), Some(&2));
        assert_eq!(agg.missing_counts.get(&ChannelId(1)), Some(&1));
        assert_eq!(agg.summary().queue_drops, 1);
    }

    #[test]
    fn test_summary_display() {
        let mut agg = InspectionMetricsAggregator::new();
        agg.total_batches = 100;
        agg.accepted = 95;
        agg.rejected = 5;
        agg.update_eviction(&[ChannelId(2)]);

        let output = agg.summary().to_string();
        assert!(output.contains("Batches: 100"));
        assert!(output.contains("95.00% accepted"));
        assert!(output.contains("cam2: 1"));
    }
}
