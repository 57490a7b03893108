//! Per-observer queue on the results bus
//!
//! Every observer (UI, decision log, status feed) gets its own bounded
//! queue and writer task. An observer that falls behind loses its own
//! events; the bus and the other observers keep going.

use std::sync::Arc;

use contracts::{InspectionEvent, ResultSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::metrics::SinkMetrics;

pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<InspectionEvent>,
    metrics: Arc<SinkMetrics>,
    writer: JoinHandle<()>,
}

impl SinkHandle {
    /// Start the writer task for `sink` behind a queue of `queue_capacity`
    pub fn spawn<S: ResultSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());
        let writer = tokio::spawn(write_events(sink, rx, Arc::clone(&metrics)));
        Self {
            name,
            tx,
            metrics,
            writer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue an event without waiting
    ///
    /// Returns false when the event was not queued. A full queue counts
    /// the event as dropped for this observer only.
    pub fn try_send(&self, event: InspectionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.inc_dropped_count();
                match &event {
                    // Previews arrive per frame; losing some is routine
                    InspectionEvent::Preview(p) => debug!(
                        sink = %self.name,
                        trigger_index = p.trigger_index,
                        channel = %p.channel_id,
                        "Observer behind, preview dropped"
                    ),
                    _ => warn!(
                        sink = %self.name,
                        trigger_index = ?event.trigger_index(),
                        "Observer behind, event dropped"
                    ),
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "Observer writer is gone");
                false
            }
        }
    }

    /// Close the queue, let the writer drain it, then flush and close the sink
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            error!(sink = %self.name, error = %e, "Observer writer panicked");
        }
    }
}

#[instrument(name = "sink_writer", skip_all, fields(sink = %sink.name()))]
async fn write_events<S: ResultSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<InspectionEvent>,
    metrics: Arc<SinkMetrics>,
) {
    let name = sink.name().to_string();
    while let Some(event) = rx.recv().await {
        metrics.set_queue_len(rx.len());
        let written = sink.write(&event).await;
        observability::record_sink_write(&name, written.is_ok());
        match written {
            Ok(()) => metrics.inc_write_count(),
            Err(e) => {
                metrics.inc_failure_count();
                error!(trigger_index = ?event.trigger_index(), error = %e, "Observer write failed");
            }
        }
    }
    metrics.set_queue_len(0);

    if let Err(e) = sink.flush().await {
        error!(error = %e, "Observer flush failed");
    }
    if let Err(e) = sink.close().await {
        error!(error = %e, "Observer close failed");
    }
    debug!(
        written = metrics.write_count(),
        failed = metrics.failure_count(),
        "Observer writer stopped"
    );
}
