//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::InspectionBlueprint;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    channel_count: usize,
    trigger_device: bool,
    ok_threshold: f64,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    channel_count: blueprint.channel_count(),
                    trigger_device: blueprint.trigger.dio.is_some(),
                    ok_threshold: blueprint.dispatch.ok_threshold,
                    sink_count: blueprint.sinks.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect non-fatal configuration issues
fn collect_warnings(blueprint: &InspectionBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sinks.is_empty() {
        warnings.push("No sinks configured - previews and decisions will not be observed".to_string());
    }

    match &blueprint.trigger.dio {
        None => warnings.push(format!(
            "No trigger device configured - running synthetic trigger at {} Hz",
            blueprint.trigger.synthetic_hz
        )),
        Some(dio) if dio.output_line().is_none() => {
            warnings.push("No OK/NG output line configured - decisions are not written back".to_string());
        }
        Some(_) => {}
    }

    let hold = blueprint.alignment.max_hold_ms;
    let trigger_period_ms = 1000.0 / blueprint.trigger.synthetic_hz;
    if blueprint.trigger.dio.is_none() && (hold as f64) > trigger_period_ms * 4.0 {
        warnings.push(format!(
            "alignment.max_hold_ms ({hold}) spans more than four synthetic trigger periods"
        ));
    }

    if blueprint.dispatch.ok_threshold <= 0.0 {
        warnings.push("dispatch.ok_threshold <= 0 - every batch will be rejected".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Channels: {}", summary.channel_count);
            println!(
                "  Trigger: {}",
                if summary.trigger_device { "device" } else { "synthetic" }
            );
            println!("  Threshold: {}", summary.ok_threshold);
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
