//! Configuration parsing
//!
//! TOML is the primary format, JSON is accepted as well.

use contracts::{ContractError, InspectionBlueprint};

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Infer format from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn parse_toml(content: &str) -> Result<InspectionBlueprint, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse_json(content: &str) -> Result<InspectionBlueprint, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

pub fn parse(content: &str, format: ConfigFormat) -> Result<InspectionBlueprint, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{QueuePolicy, SinkType};

    #[test]
    fn test_parse_toml_full() {
        let content = r#"
[trigger]
synthetic_hz = 25.0

[trigger.dio]
device_index = 1
input_port = 0
trigger_bit = 3
output_port = 1
ok_bit = 0
poll_hz = 4000.0

[[channels]]
serial = "41910001"
exposure_us = 1500

[[channels]]
serial = "41910002"
pixel_format = "mono16"

[alignment]
max_hold_ms = 12

[dispatch]
ok_threshold = 0.4
queue_bound = 3
queue_policy = "fifo"

[[sinks]]
name = "log_sink"
sink_type = "log"
"#;
        let bp = parse_toml(content).unwrap();
        assert_eq!(bp.channel_count(), 2);
        assert_eq!(bp.channels[0].exposure_us, 1500);
        let dio = bp.trigger.dio.as_ref().unwrap();
        assert_eq!(dio.trigger_bit, 3);
        assert_eq!(dio.output_line(), Some((1, 0)));
        assert_eq!(bp.alignment.max_hold_ms, 12);
        assert_eq!(bp.alignment.max_partials, 64);
        assert_eq!(bp.dispatch.queue_policy, QueuePolicy::Fifo);
        assert_eq!(bp.sinks[0].sink_type, SinkType::Log);
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "channels": [{ "serial": "A" }, { "serial": "B" }],
            "sinks": [{ "name": "log", "sink_type": "log" }]
        }"#;
        let bp = parse_json(content).unwrap();
        assert_eq!(bp.channel_count(), 2);
        assert!(bp.trigger.dio.is_none());
        assert_eq!(bp.dispatch.ok_threshold, 0.5);
        assert_eq!(bp.dispatch.queue_bound, 2);
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let result = parse_toml("invalid toml [[[");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_parse_missing_channels() {
        let result = parse_toml("[trigger]\nsynthetic_hz = 20.0\n");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_extension("toml"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("TOML"), Some(ConfigFormat::Toml));
        assert_eq!(ConfigFormat::from_extension("json"), Some(ConfigFormat::Json));
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
