//! Results bus - publisher side and fan-out to sinks

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace};

use contracts::{Decision, InspectionEvent, PreviewEvent, SinkConfig, SinkType, StatusEvent};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::LogSink;

/// Publisher handle of the results bus
///
/// Cloned into every component that reports events. Publishing never
/// blocks: when the bus queue is full the event is dropped and counted.
#[derive(Clone)]
pub struct ResultsBus {
    tx: mpsc::Sender<InspectionEvent>,
    dropped: Arc<AtomicU64>,
}

impl ResultsBus {
    /// Create a bus and the receiver its dispatcher consumes
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InspectionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Bus without observers; every publish is discarded
    pub fn disconnected() -> Self {
        let (bus, _rx) = Self::new(1);
        bus
    }

    /// Publish one event, returns false if it was dropped
    pub fn publish(&self, event: InspectionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(trigger_index = ?event.trigger_index(), "Results bus full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("Results bus closed");
                false
            }
        }
    }

    pub fn publish_preview(&self, preview: PreviewEvent) -> bool {
        self.publish(InspectionEvent::Preview(preview))
    }

    pub fn publish_decision(&self, decision: Decision) -> bool {
        self.publish(InspectionEvent::Decision(decision))
    }

    pub fn publish_status(&self, status: StatusEvent) -> bool {
        self.publish(InspectionEvent::Status(status))
    }

    /// Events dropped because the bus queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Fan-out task between the bus and its sinks
pub struct BusDispatcher {
    handles: Vec<SinkHandle>,
    input_rx: mpsc::Receiver<InspectionEvent>,
}

impl BusDispatcher {
    /// Create a dispatcher with custom sink handles
    pub fn with_handles(
        handles: Vec<SinkHandle>,
        input_rx: mpsc::Receiver<InspectionEvent>,
    ) -> Self {
        Self { handles, input_rx }
    }

    pub fn sink_count(&self) -> usize {
        self.handles.len()
    }

    /// Get metrics for all sinks
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run the fan-out loop
    ///
    /// Returns the per-sink metrics once every `ResultsBus` clone is dropped
    /// and all sinks have drained.
    #[instrument(name = "bus_dispatcher_run", skip(self))]
    pub async fn run(mut self) -> Vec<(String, MetricsSnapshot)> {
        info!(sinks = self.handles.len(), "Bus dispatcher started");

        let mut event_count: u64 = 0;
        while let Some(event) = self.input_rx.recv().await {
            event_count += 1;
            for handle in &self.handles {
                handle.try_send(event.clone());
            }

            if event_count.is_multiple_of(500) {
                debug!(events = event_count, "Bus dispatcher progress");
            }
        }

        info!(events = event_count, "Bus closed, shutting down sinks");

        let metrics: Vec<_> = self
            .handles
            .iter()
            .map(|h| (h.name().to_string(), Arc::clone(h.metrics())))
            .collect();
        for handle in self.handles {
            handle.shutdown().await;
        }
        info!("Bus dispatcher shutdown complete");
        metrics
            .into_iter()
            .map(|(name, m)| (name, m.snapshot()))
            .collect()
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> JoinHandle<Vec<(String, MetricsSnapshot)>> {
        tokio::spawn(self.run())
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "bus_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// Build the results bus and its dispatcher from sink configs
///
/// Must be called inside a tokio runtime: every sink worker is spawned here.
#[instrument(name = "bus_create", skip(sink_configs), fields(sinks = sink_configs.len()))]
pub fn create_results_bus(
    sink_configs: &[SinkConfig],
    capacity: usize,
) -> Result<(ResultsBus, BusDispatcher), DispatcherError> {
    let mut names = std::collections::HashSet::new();
    for config in sink_configs {
        if !names.insert(config.name.as_str()) {
            return Err(DispatcherError::DuplicateSink {
                name: config.name.clone(),
            });
        }
    }

    let handles = sink_configs
        .iter()
        .map(create_sink_handle)
        .collect::<Result<Vec<_>, _>>()?;
    let (bus, rx) = ResultsBus::new(capacity);
    Ok((bus, BusDispatcher::with_handles(handles, rx)))
}
