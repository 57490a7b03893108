//! Configuration validation
//!
//! Rules:
//! - at least one channel, channel ids fit in `u16`
//! - channel serials unique
//! - poll_hz, synthetic_hz, synthetic_fps > 0
//! - output_port and ok_bit both set or both absent
//! - max_hold_ms > 0, max_partials >= 1
//! - queue_bound >= 1, ok_threshold finite
//! - sink names non-empty and unique

use std::collections::HashSet;

use contracts::{ContractError, InspectionBlueprint};

/// Validate an InspectionBlueprint
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(blueprint: &InspectionBlueprint) -> Result<(), ContractError> {
    validate_channels(blueprint)?;
    validate_trigger(blueprint)?;
    validate_alignment(blueprint)?;
    validate_dispatch(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

fn positive(field: String, value: f64) -> Result<(), ContractError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ContractError::config_validation(
            field,
            format!("must be > 0, got {value}"),
        ))
    }
}

fn validate_channels(blueprint: &InspectionBlueprint) -> Result<(), ContractError> {
    if blueprint.channels.is_empty() {
        return Err(ContractError::config_validation(
            "channels",
            "at least one channel is required",
        ));
    }
    if blueprint.channels.len() > u16::MAX as usize {
        return Err(ContractError::config_validation(
            "channels",
            format!("too many channels: {}", blueprint.channels.len()),
        ));
    }

    let mut seen = HashSet::new();
    for (idx, channel) in blueprint.channels.iter().enumerate() {
        if channel.serial.is_empty() {
            return Err(ContractError::config_validation(
                format!("channels[{idx}].serial"),
                "serial cannot be empty",
            ));
        }
        if !seen.insert(channel.serial.as_str()) {
            return Err(ContractError::config_validation(
                format!("channels[{idx}].serial"),
                format!("duplicate serial '{}'", channel.serial),
            ));
        }
        positive(
            format!("channels[{idx}].synthetic_fps"),
            channel.synthetic_fps,
        )?;
    }
    Ok(())
}

fn validate_trigger(blueprint: &InspectionBlueprint) -> Result<(), ContractError> {
    let trigger = &blueprint.trigger;
    positive("trigger.synthetic_hz".into(), trigger.synthetic_hz)?;

    if let Some(dio) = &trigger.dio {
        positive("trigger.dio.poll_hz".into(), dio.poll_hz)?;
        if dio.output_port.is_some() != dio.ok_bit.is_some() {
            return Err(ContractError::config_validation(
                "trigger.dio.output_port / trigger.dio.ok_bit",
                "output_port and ok_bit must be set together",
            ));
        }
    }
    Ok(())
}

fn validate_alignment(blueprint: &InspectionBlueprint) -> Result<(), ContractError> {
    let alignment = &blueprint.alignment;
    if alignment.max_hold_ms == 0 {
        return Err(ContractError::config_validation(
            "alignment.max_hold_ms",
            "max_hold_ms must be > 0",
        ));
    }
    if alignment.max_partials == 0 {
        return Err(ContractError::config_validation(
            "alignment.max_partials",
            "max_partials must be >= 1",
        ));
    }
    Ok(())
}

fn validate_dispatch(blueprint: &InspectionBlueprint) -> Result<(), ContractError> {
    let dispatch = &blueprint.dispatch;
    if dispatch.queue_bound == 0 {
        return Err(ContractError::config_validation(
            "dispatch.queue_bound",
            "queue_bound must be >= 1",
        ));
    }
    if !dispatch.ok_threshold.is_finite() {
        return Err(ContractError::config_validation(
            "dispatch.ok_threshold",
            format!("threshold must be finite, got {}", dispatch.ok_threshold),
        ));
    }
    Ok(())
}

fn validate_sinks(blueprint: &InspectionBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[{idx}].name"),
                format!("duplicate sink name '{}'", sink.name),
            ));
        }
    }
    Ok(())
}
