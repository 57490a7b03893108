//! ChannelSink - forwards events to an in-process receiver

use contracts::{ContractError, InspectionEvent, ResultSink};
use tokio::sync::mpsc;

/// Sink handing every event to an mpsc receiver
///
/// Used by in-process observers (operator UI, tests). A full receiver only
/// stalls this sink's own worker.
pub struct ChannelSink {
    name: String,
    tx: mpsc::Sender<InspectionEvent>,
}

impl ChannelSink {
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<InspectionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl ResultSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, event: &InspectionEvent) -> Result<(), ContractError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| ContractError::sink_write(&self.name, "receiver dropped"))
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}
