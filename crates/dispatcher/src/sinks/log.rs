//! LogSink - logs inspection events via tracing

use std::collections::HashMap;

use contracts::{ContractError, InspectionEvent, ResultSink, StatusEvent};
use tracing::{debug, info, instrument, warn};

/// Rendering of decision and status events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One field per attribute
    #[default]
    Fields,
    /// Whole event serialized as a JSON string field
    Json,
}

/// Sink that logs event summaries
pub struct LogSink {
    name: String,
    format: LogFormat,
    events: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: LogFormat::Fields,
            events: 0,
        }
    }

    /// Create from config params
    ///
    /// Params:
    /// - `format`: `fields` (default) or `json`
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let format = match params.get("format").map(String::as_str) {
            None | Some("fields") => LogFormat::Fields,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ContractError::config_validation(
                    format!("sinks.{name}.params.format"),
                    format!("unknown log format '{other}'"),
                ))
            }
        };
        Ok(Self {
            name,
            format,
            events: 0,
        })
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    fn log_event(&self, event: &InspectionEvent) -> Result<(), ContractError> {
        match (event, self.format) {
            (InspectionEvent::Preview(preview), _) => {
                debug!(
                    sink = %self.name,
                    trigger_index = preview.trigger_index,
                    channel_id = %preview.channel_id,
                    width = preview.image.width,
                    height = preview.image.height,
                    "preview"
                );
            }
            (InspectionEvent::Decision(decision), LogFormat::Json) => {
                let json = serde_json::to_string(decision)
                    .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
                info!(sink = %self.name, decision = %json, "decision");
            }
            (InspectionEvent::Decision(decision), LogFormat::Fields) => {
                info!(
                    sink = %self.name,
                    trigger_index = decision.trigger_index,
                    fused_score = decision.fused_score,
                    accept = decision.accept,
                    indeterminate = decision.is_indeterminate(),
                    latency_ms = decision.latency_ms,
                    "decision"
                );
            }
            (InspectionEvent::Status(status), LogFormat::Json) => {
                let json = serde_json::to_string(status)
                    .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
                info!(sink = %self.name, status = %json, "status");
            }
            (InspectionEvent::Status(status), LogFormat::Fields) => match status {
                StatusEvent::ChannelConnection {
                    channel_id,
                    connected: true,
                } => info!(sink = %self.name, channel_id = %channel_id, "channel connected"),
                StatusEvent::ChannelConnection {
                    channel_id,
                    connected: false,
                } => warn!(sink = %self.name, channel_id = %channel_id, "channel disconnected"),
                StatusEvent::TriggerSynthetic { reason } => {
                    warn!(sink = %self.name, reason = %reason, "trigger running synthetic")
                }
                StatusEvent::BatchDropped { trigger_index } => {
                    warn!(sink = %self.name, trigger_index, "batch dropped")
                }
            },
        }
        Ok(())
    }
}

impl ResultSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, event),
        fields(sink = %self.name, trigger_index = ?event.trigger_index())
    )]
    async fn write(&mut self, event: &InspectionEvent) -> Result<(), ContractError> {
        self.log_event(event)?;
        self.events += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, events = self.events, "LogSink closed");
        Ok(())
    }
}
