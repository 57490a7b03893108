//! Pipeline statistics and metrics.

use std::time::Duration;

use capture::CaptureMetricsSnapshot;
use contracts::{ChannelId, TriggerIndex};
use dispatcher::{GateSnapshot, MetricsSnapshot};
use observability::InspectionMetricsAggregator;
use sync_engine::AlignmentSnapshot;
use trigger_source::TriggerMode;

/// Statistics from a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Batches completed by the alignment engine
    pub batches: u64,

    /// Decisions received from the gate
    pub decisions: u64,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Trigger index at shutdown
    pub final_trigger_index: TriggerIndex,

    /// Trigger source mode at shutdown
    pub trigger_mode: TriggerMode,

    pub active_channels: usize,

    /// Channels running on a synthetic substitute
    pub degraded_channels: Vec<ChannelId>,

    pub active_sinks: usize,

    pub alignment: AlignmentSnapshot,

    pub gate: GateSnapshot,

    pub capture: Vec<(ChannelId, CaptureMetricsSnapshot)>,

    pub sinks: Vec<(String, MetricsSnapshot)>,

    /// Events dropped at the results bus itself
    pub bus_dropped: u64,

    pub inspection: InspectionMetricsAggregator,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            batches: 0,
            decisions: 0,
            duration: Duration::ZERO,
            final_trigger_index: 0,
            trigger_mode: TriggerMode::Synthetic,
            active_channels: 0,
            degraded_channels: Vec::new(),
            active_sinks: 0,
            alignment: AlignmentSnapshot::default(),
            gate: GateSnapshot::default(),
            capture: Vec::new(),
            sinks: Vec::new(),
            bus_dropped: 0,
            inspection: InspectionMetricsAggregator::default(),
        }
    }
}

impl PipelineStats {
    /// Decisions per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.decisions as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of trigger cycles that produced a batch (%)
    pub fn completion_rate(&self) -> f64 {
        if self.final_trigger_index > 0 {
            (self.batches as f64 / self.final_trigger_index as f64 * 100.0).min(100.0)
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!(
            "   ├─ Trigger: {} (index {})",
            self.trigger_mode, self.final_trigger_index
        );
        println!(
            "   ├─ Batches: {} ({:.2}% of triggers)",
            self.batches,
            self.completion_rate()
        );
        println!("   ├─ Decisions: {}", self.decisions);
        println!("   ├─ Throughput: {:.2}/s", self.throughput());
        println!(
            "   ├─ Channels: {} ({} synthetic)",
            self.active_channels,
            self.degraded_channels.len()
        );
        println!("   └─ Sinks: {}", self.active_sinks);

        println!("\n📷 Capture");
        for (i, (channel_id, snap)) in self.capture.iter().enumerate() {
            let prefix = if i + 1 == self.capture.len() { "└─" } else { "├─" };
            println!(
                "   {} {}: captured {}, dropped {}, timeouts {}, errors {}",
                prefix,
                channel_id,
                snap.frames_captured,
                snap.frames_dropped,
                snap.acquire_timeouts,
                snap.acquire_errors
            );
        }

        let a = &self.alignment;
        println!("\n🔗 Alignment");
        println!("   ├─ Frames received: {}", a.frames_received);
        println!(
            "   ├─ Partials evicted: {} ({} on overflow)",
            a.partials_evicted, a.overflow_evictions
        );
        println!(
            "   ├─ Frames rejected: late {}, duplicate {}, unknown channel {}",
            a.frames_late, a.frames_duplicate, a.frames_unknown_channel
        );
        println!("   └─ Frames replaced: {}", a.frames_replaced);

        let g = &self.gate;
        println!("\n🚦 Dispatch Gate");
        println!("   ├─ Batches received: {}", g.batches_received);
        println!("   ├─ Queue drops: {}", g.batches_dropped);
        println!(
            "   └─ Accepted {}, rejected {} ({} indeterminate)",
            g.accepted, g.rejected, g.indeterminate
        );

        if !self.sinks.is_empty() {
            println!("\n📤 Sinks (bus drops: {})", self.bus_dropped);
            for (i, (name, snap)) in self.sinks.iter().enumerate() {
                let prefix = if i + 1 == self.sinks.len() { "└─" } else { "├─" };
                println!(
                    "   {} {}: written {}, failed {}, dropped {}",
                    prefix, name, snap.write_count, snap.failure_count, snap.dropped_count
                );
            }
        }

        println!("\n{}", self.inspection.summary());
    }
}
