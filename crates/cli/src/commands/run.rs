//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use config_loader::ConfigLoader;
use contracts::{
    AlignmentConfig, ChannelConfig, ConfigVersion, DispatchConfig, InspectionBlueprint,
    SinkConfig, SinkType, TriggerConfig,
};

use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    let blueprint = load_blueprint(args)?;

    info!(
        channels = blueprint.channel_count(),
        trigger_device = blueprint.trigger.dio.is_some(),
        threshold = blueprint.dispatch.ok_threshold,
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        blueprint,
        max_batches: (args.max_batches > 0).then_some(args.max_batches),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        buffer_size: args.buffer_size,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    info!("Starting pipeline...");
    let stats = Pipeline::new(pipeline_config)
        .run(shutdown_signal())
        .await
        .context("Pipeline execution failed")?;

    info!(
        batches = stats.batches,
        decisions = stats.decisions,
        duration_secs = stats.duration.as_secs_f64(),
        throughput = format!("{:.2}", stats.throughput()),
        "Pipeline completed"
    );
    stats.print_summary();

    info!("Trigger Sync finished");
    Ok(())
}

/// Load the blueprint from file (or synthesize it) and apply CLI overrides
fn load_blueprint(args: &RunArgs) -> Result<InspectionBlueprint> {
    let mut blueprint = match args.synthetic_channels {
        Some(n) if !args.config.exists() => {
            info!(channels = n, "No configuration file, using synthetic channels");
            synthetic_blueprint(n)
        }
        _ => {
            info!(config = %args.config.display(), "Loading configuration");
            if !args.config.exists() {
                anyhow::bail!("Configuration file not found: {}", args.config.display());
            }
            ConfigLoader::load_from_path(&args.config).with_context(|| {
                format!("Failed to load config from {}", args.config.display())
            })?
        }
    };

    if let Some(hz) = args.synthetic_hz {
        info!(hz, "Overriding synthetic trigger rate from CLI");
        blueprint.trigger.synthetic_hz = hz;
    }
    if let Some(threshold) = args.ok_threshold {
        info!(threshold, "Overriding accept threshold from CLI");
        blueprint.dispatch.ok_threshold = threshold;
    }

    ConfigLoader::validate(&blueprint).context("Invalid configuration after CLI overrides")?;
    Ok(blueprint)
}

/// Blueprint of `n` camera channels with a log sink and default policies
fn synthetic_blueprint(n: u16) -> InspectionBlueprint {
    InspectionBlueprint {
        version: ConfigVersion::V1,
        trigger: TriggerConfig::default(),
        channels: (0..n)
            .map(|i| ChannelConfig::with_serial(format!("SIM{i:03}")))
            .collect(),
        alignment: AlignmentConfig::default(),
        dispatch: DispatchConfig::default(),
        sinks: vec![SinkConfig {
            name: "log".to_string(),
            sink_type: SinkType::Log,
            queue_capacity: 100,
            params: Default::default(),
        }],
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &InspectionBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    match &blueprint.trigger.dio {
        Some(dio) => println!(
            "Trigger: device {} port {} bit {} at {} Hz",
            dio.device_index, dio.input_port, dio.trigger_bit, dio.poll_hz
        ),
        None => println!(
            "Trigger: synthetic at {} Hz",
            blueprint.trigger.synthetic_hz
        ),
    }

    println!("\nChannels ({}):", blueprint.channel_count());
    for (channel_id, channel) in blueprint.channels_with_ids() {
        println!(
            "  - {} serial {} ({}, {}x{})",
            channel_id,
            channel.serial,
            channel.model,
            channel.resolution[0],
            channel.resolution[1]
        );
    }

    let alignment = &blueprint.alignment;
    println!(
        "\nAlignment: hold {} ms, max {} partials",
        alignment.max_hold_ms, alignment.max_partials
    );
    let dispatch = &blueprint.dispatch;
    println!(
        "Dispatch: threshold {}, queue {} ({:?})",
        dispatch.ok_threshold, dispatch.queue_bound, dispatch.queue_policy
    );

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
