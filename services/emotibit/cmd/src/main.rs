//! EmotiBit Wi-Fi host binary.
//!
//! Discovers EmotiBit devices on the local network, connects to one and prints
//! every delivered sample as a JSON line on stdout. Logs go to stderr.

use anyhow::Context;
use chrono::{DateTime, Local};
use clap::Parser;
use emotibit_host::{ConnectionPhase, DeviceRecord, PacketHeader, Sample, TypeTag, WifiHost};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::LinkConfig;
use logging::LinkLogFormatter;

/// EmotiBit Wi-Fi host
#[derive(Parser, Debug)]
#[command(name = "emotibit-link", version, about = "Discover EmotiBit devices and stream their samples as JSON lines")]
struct Args {
    /// Configuration file path (.yaml, .yml or .json)
    #[arg(long, default_value = "emotibit.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Connect to the first available device discovered
    #[arg(long)]
    auto_connect: bool,

    /// Device id to connect to once discovered
    #[arg(long)]
    device: Option<String>,

    /// Log per-packet diagnostics
    #[arg(long)]
    debug_logs: bool,

    /// Advertising port devices listen on
    #[arg(long)]
    advertising_port: Option<u16>,

    /// Tick interval, e.g. 20ms
    #[arg(long, default_value = "20ms")]
    tick_interval: humantime::Duration,

    /// How often to report discovered devices and retry the requested connection
    #[arg(long, default_value = "1s")]
    status_interval: humantime::Duration,
}

/// One delivered sample on stdout
#[derive(Serialize)]
struct SampleLine<'a> {
    received_at: DateTime<Local>,
    tag: TypeTag,
    name: Option<&'static str>,
    values: &'a [f32],
    header: &'a PacketHeader,
}

fn emit_sample(out: &mut impl Write, tag: TypeTag, sample: &Sample) -> anyhow::Result<()> {
    let line = SampleLine {
        received_at: Local::now(),
        tag,
        name: tag.name(),
        values: &sample.values,
        header: &sample.header,
    };
    serde_json::to_writer(&mut *out, &line)?;
    writeln!(out)?;
    Ok(())
}

fn describe(devices: &[DeviceRecord]) -> String {
    devices
        .iter()
        .map(|d| format!("{}@{}{}", d.id, d.ip, if d.available { "" } else { " (busy)" }))
        .collect::<Vec<_>>()
        .join(", ")
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("emotibit_link={}", args.log_level).parse()?)
        .add_directive(format!("emotibit_host={}", args.log_level).parse()?)
        .add_directive(format!("emotibit_session={}", args.log_level).parse()?)
        .add_directive(format!("emotibit_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(LinkLogFormatter::new("emotibit"))
        .init();

    info!("Starting emotibit-link v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LinkConfig::load_from_file(&args.config)?;
    if args.auto_connect {
        config.host.auto_connect = true;
    }
    if args.debug_logs {
        config.host.debug_logs = true;
    }
    if let Some(port) = args.advertising_port {
        config.host.advertising_port = port;
    }
    if let Some(device) = args.device.clone() {
        config.device = Some(device);
    }

    let mut host = WifiHost::new();
    let ports = host
        .initialize(config.host.clone())
        .await
        .context("failed to start host")?;
    component_info!(
        "host",
        "Listening: advertising={}, data={}, control={}",
        ports.advertising,
        ports.data,
        ports.control
    );

    let mut ticker = tokio::time::interval(Duration::from(args.tick_interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = tokio::time::interval(Duration::from(args.status_interval));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut stdout = std::io::stdout().lock();
    let mut last_tick = Instant::now();
    let mut last_listing = String::new();
    let mut last_phase = ConnectionPhase::Disconnected;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let frame = host.tick(now - last_tick);
                last_tick = now;
                for (tag, sample) in frame.iter() {
                    emit_sample(&mut stdout, tag, sample)?;
                }
                for packet in host.drain_info_packets() {
                    component_debug!("control", "Info packet: {}", packet);
                }
            }

            _ = status.tick() => {
                let devices = host.devices().await;
                let listing = describe(&devices);
                if listing != last_listing {
                    component_info!("discovery", "Devices: [{}]", listing);
                    last_listing = listing;
                }

                let phase = host.connection_phase().await;
                if phase != last_phase {
                    match host.connected_device().await {
                        Some(id) => component_info!("connection", "{:?} ({})", phase, id),
                        None => component_info!("connection", "{:?}", phase),
                    }
                    last_phase = phase;
                }

                if let (Some(wanted), ConnectionPhase::Disconnected) = (config.device.as_deref(), phase) {
                    let known = devices.iter().any(|d| d.id == wanted && d.available);
                    if known && host.connect(wanted).await? {
                        component_info!("connection", "Connecting to {}", wanted);
                    }
                }
            }

            result = &mut shutdown => {
                if let Err(e) = result {
                    component_warn!("host", "Failed to listen for Ctrl-C: {}", e);
                }
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    if let Ok(stats) = host.stats() {
        component_info!(
            "host",
            "Datagrams={}, enqueued={}, malformed={}, duplicates={}, requests answered={}",
            stats.datagrams,
            stats.enqueued,
            stats.malformed,
            stats.duplicates,
            stats.requests_answered
        );
    }
    host.disconnect().await?;
    host.destroy().await;
    info!("emotibit-link shutdown complete");
    Ok(())
}
