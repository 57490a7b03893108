//! `info` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{DioConfig, InspectionBlueprint, QueuePolicy};

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    trigger: TriggerInfo,
    channel_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    channels: Vec<ChannelInfo>,
    alignment: AlignmentInfo,
    dispatch: DispatchInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct TriggerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<DioConfig>,
    synthetic_hz: f64,
    disconnect_after_errors: u32,
}

#[derive(Serialize)]
struct ChannelInfo {
    channel_id: String,
    serial: String,
    model: String,
    resolution: [u32; 2],
    pixel_format: String,
    exposure_us: u32,
    gain_db: f64,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    attributes: std::collections::HashMap<String, String>,
}

#[derive(Serialize)]
struct AlignmentInfo {
    max_hold_ms: u64,
    sweep_interval_ms: u64,
    max_partials: usize,
}

#[derive(Serialize)]
struct DispatchInfo {
    ok_threshold: f64,
    queue_bound: usize,
    queue_policy: QueuePolicy,
    publish_previews: bool,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &InspectionBlueprint, args: &InfoArgs) -> ConfigInfo {
    let channels = if args.channels {
        blueprint
            .channels_with_ids()
            .map(|(channel_id, c)| ChannelInfo {
                channel_id: channel_id.to_string(),
                serial: c.serial.clone(),
                model: c.model.clone(),
                resolution: c.resolution,
                pixel_format: format!("{:?}", c.pixel_format),
                exposure_us: c.exposure_us,
                gain_db: c.gain_db,
                attributes: c.attributes.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    let sinks = if args.sinks {
        blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        trigger: TriggerInfo {
            device: blueprint.trigger.dio.clone(),
            synthetic_hz: blueprint.trigger.synthetic_hz,
            disconnect_after_errors: blueprint.trigger.disconnect_after_errors,
        },
        channel_count: blueprint.channel_count(),
        channels,
        alignment: AlignmentInfo {
            max_hold_ms: blueprint.alignment.max_hold_ms,
            sweep_interval_ms: blueprint.alignment.sweep_interval().as_millis() as u64,
            max_partials: blueprint.alignment.max_partials,
        },
        dispatch: DispatchInfo {
            ok_threshold: blueprint.dispatch.ok_threshold,
            queue_bound: blueprint.dispatch.queue_bound,
            queue_policy: blueprint.dispatch.queue_policy,
            publish_previews: blueprint.dispatch.publish_previews,
        },
        sinks,
    }
}

fn print_config_info(blueprint: &InspectionBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Trigger Sync Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("⏱  Trigger");
    println!("   ├─ Version: {:?}", blueprint.version);
    match &blueprint.trigger.dio {
        Some(dio) => {
            println!(
                "   ├─ Device: #{} port {} bit {} at {} Hz",
                dio.device_index, dio.input_port, dio.trigger_bit, dio.poll_hz
            );
            match dio.output_line() {
                Some((port, bit)) => println!("   ├─ OK/NG output: port {} bit {}", port, bit),
                None => println!("   ├─ OK/NG output: none"),
            }
        }
        None => println!("   ├─ Device: none"),
    }
    println!(
        "   └─ Synthetic fallback: {} Hz",
        blueprint.trigger.synthetic_hz
    );

    println!("\n📷 Channels ({})", blueprint.channel_count());
    for (i, (channel_id, channel)) in blueprint.channels_with_ids().enumerate() {
        let is_last = i + 1 == blueprint.channel_count();
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!("   {} {} serial {} ({})", prefix, channel_id, channel.serial, channel.model);
        if args.channels {
            println!(
                "   {}  ├─ {}x{} {:?}",
                child_prefix, channel.resolution[0], channel.resolution[1], channel.pixel_format
            );
            println!(
                "   {}  ├─ exposure {} µs, gain {} dB",
                child_prefix, channel.exposure_us, channel.gain_db
            );
            println!(
                "   {}  └─ trigger {} = {}",
                child_prefix, channel.trigger_selector, channel.trigger_mode
            );
        }
    }

    let alignment = &blueprint.alignment;
    println!("\n🔗 Alignment");
    println!("   ├─ Max hold: {} ms", alignment.max_hold_ms);
    println!("   ├─ Sweep interval: {:?}", alignment.sweep_interval());
    println!("   └─ Max partials: {}", alignment.max_partials);

    let dispatch = &blueprint.dispatch;
    println!("\n🚦 Dispatch");
    println!("   ├─ OK threshold: {}", dispatch.ok_threshold);
    println!(
        "   ├─ Queue: {} ({:?})",
        dispatch.queue_bound, dispatch.queue_policy
    );
    println!("   └─ Previews: {}", dispatch.publish_previews);

    if !blueprint.sinks.is_empty() {
        println!("\n📤 Sinks ({})", blueprint.sinks.len());
        for (i, sink) in blueprint.sinks.iter().enumerate() {
            let is_last = i + 1 == blueprint.sinks.len();
            let prefix = if is_last { "└─" } else { "├─" };
            if args.sinks {
                println!(
                    "   {} {} ({:?}, queue {})",
                    prefix, sink.name, sink.sink_type, sink.queue_capacity
                );
            } else {
                println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);
            }
        }
    }

    println!();
}
