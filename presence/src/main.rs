/*!
# Presence Controller

Reads the LD2450 radar over UART and turns the nearest person's distance and
direction into actuator values for the installation.

## Features

- Background acquisition with automatic reconnect
- Per-slot coordinate smoothing
- Rate-limited output channels enabled from the config file
- One-shot device query
- Live frame monitor and a query consistency check for bench work

## Usage

### Run the control loop
```bash
presence --config presence.toml run
```

### Query the module
```bash
presence --config presence.toml info
```

### Watch the frame stream
```bash
presence --config presence.toml monitor --frames 100
```

### Check that repeated queries agree
```bash
presence --config presence.toml test --count 200
```

### Generate a configuration file
```bash
presence config --output presence.toml
```
*/

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ld2450::{
    AcquisitionSupervisor, ProtocolClient, SerialPortChannel, SerialPortConnector,
    SupervisorHandle,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod control;
mod diagnostics;
#[cfg(test)]
mod testing;

use config::{AppConfig, RadarConfig};
use control::{Capabilities, Controller, LoggingActuator};

#[derive(Parser)]
#[command(name = "presence")]
#[command(about = "Radar-driven presence controller")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "presence.toml")]
    config: PathBuf,

    /// Serial device, overrides the config file
    #[arg(short, long)]
    port: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run acquisition and the control loop (default)
    Run,

    /// Print firmware, radio, tracking and zone settings
    Info,

    /// Print decoded frames with queue depth and serial backlog
    Monitor {
        /// Stop after this many frames (default: until Ctrl+C)
        #[arg(short, long)]
        frames: Option<u64>,
    },

    /// Repeat the read-only queries and report every distinct answer
    Test {
        /// Number of query rounds
        #[arg(short = 'n', long, default_value = "10")]
        count: u32,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "presence.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Some(Commands::Config { output }) => generate_config_file(output),
        Some(Commands::Info) => {
            let config = load_config(&cli.config, cli.port)?;
            print_device_info(&config)
        }
        Some(Commands::Monitor { frames }) => {
            let config = load_config(&cli.config, cli.port)?;
            monitor_frames(&config.radar, frames)
        }
        Some(Commands::Test { count }) => {
            let config = load_config(&cli.config, cli.port)?;
            check_query_consistency(&config.radar, count)
        }
        Some(Commands::Run) | None => {
            let config = load_config(&cli.config, cli.port)?;
            run_controller(config)
        }
    }
}

fn load_config(path: &Path, port: Option<String>) -> Result<AppConfig> {
    let mut config = if path.exists() {
        AppConfig::load_from_file(path)?
    } else {
        warn!("⚠️ {} not found, using defaults", path.display());
        AppConfig::new()
    };

    if let Some(port) = port {
        config.radar.port = port;
    }
    Ok(config)
}

/// Run acquisition on a background thread and the control loop on this one
fn run_controller(config: AppConfig) -> Result<()> {
    let radar = &config.radar;
    println!("🚀 Starting presence controller");
    println!("🔌 Port: {} @ {} baud", radar.port, radar.baud_rate);

    let capabilities =
        Capabilities::from_config(&config).context("Invalid output channel settings")?;
    if capabilities.is_empty() {
        warn!("⚠️ No output channels configured, only tracking");
    }
    let mut controller = Controller::new(radar, capabilities, LoggingActuator::new(&config))
        .context("Invalid smoothing settings")?;

    let (handle, acquisition) = start_acquisition(radar)?;
    controller.run(&handle, radar.poll_interval());

    acquisition
        .join()
        .map_err(|_| anyhow!("Acquisition thread panicked"))?;

    let stats = handle.stats();
    info!(
        "📊 {} frames decoded, {} dropped, {} anomalies, {} reconnects",
        stats.frames_decoded, stats.frames_dropped, stats.anomalies, stats.reconnects
    );
    println!("✅ Presence controller stopped");
    Ok(())
}

/// Spawn the acquisition loop with a Ctrl+C handler that stops it
fn start_acquisition(radar: &RadarConfig) -> Result<(SupervisorHandle, JoinHandle<()>)> {
    let connector = SerialPortConnector {
        path: radar.port.clone(),
        baud_rate: radar.baud_rate,
        read_timeout: radar.read_timeout(),
    };
    let supervisor = AcquisitionSupervisor::new(connector, radar.supervisor_config());
    let handle = supervisor.handle();

    // Set up Ctrl+C handler
    let stopper = handle.clone();
    ctrlc::set_handler(move || {
        println!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        stopper.stop();
    })?;

    let acquisition = supervisor
        .spawn()
        .context("Failed to start acquisition thread")?;
    Ok((handle, acquisition))
}

/// Stream frames to stdout; stale input is dropped on every connect
fn monitor_frames(radar: &RadarConfig, frames: Option<u64>) -> Result<()> {
    println!("📡 Monitoring {} @ {} baud", radar.port, radar.baud_rate);
    let (handle, acquisition) = start_acquisition(radar)?;

    let result = diagnostics::monitor(&handle, frames, &mut std::io::stdout().lock());
    handle.stop();
    acquisition
        .join()
        .map_err(|_| anyhow!("Acquisition thread panicked"))?;
    let shown = result.context("Failed to write to stdout")?;

    let stats = handle.stats();
    println!(
        "📊 {} frames shown, {} decoded, {} dropped, {} anomalies",
        shown, stats.frames_decoded, stats.frames_dropped, stats.anomalies
    );
    Ok(())
}

/// Run the query rounds against the module and print the distinct answers
fn check_query_consistency(radar: &RadarConfig, count: u32) -> Result<()> {
    let channel = SerialPortChannel::open(&radar.port, radar.baud_rate, radar.read_timeout())
        .with_context(|| format!("Failed to open {}", radar.port))?;
    let mut client = ProtocolClient::new(channel);

    println!("🔁 Querying {} rounds", count);
    let report = diagnostics::query_consistency(&mut client, count)
        .context("Lost the radar during the query rounds")?;

    let show = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(", ");
    println!("📟 Firmware version: [{}]", show(&report.firmware));
    println!("📶 MAC address:      [{}]", show(&report.mac));
    println!("🎯 Tracking mode:    [{}]", show(&report.tracking));
    if report.failures > 0 {
        println!("⚠️ {} of {} queries failed", report.failures, report.rounds * 3);
    }
    if report.is_consistent() {
        println!("✅ {} rounds, answers consistent", report.rounds);
    } else {
        println!("❌ {} rounds, answers differ", report.rounds);
    }
    Ok(())
}

/// Query the module once and print its settings
fn print_device_info(config: &AppConfig) -> Result<()> {
    let radar = &config.radar;
    let channel = SerialPortChannel::open(&radar.port, radar.baud_rate, radar.read_timeout())
        .with_context(|| format!("Failed to open {}", radar.port))?;
    let mut client = ProtocolClient::new(channel);

    let info = client
        .device_info()
        .context("Failed to query the radar")?;

    println!("📟 Firmware:    {}", info.firmware);
    match info.mac {
        Some(mac) => println!("📶 Bluetooth:   on ({})", mac),
        None => println!("📶 Bluetooth:   off"),
    }
    println!("🎯 Tracking:    {:?}", info.tracking);
    println!("🗺️ Zone filter: {:?}", info.zone_filter.mode);
    for (i, region) in info.zone_filter.regions.iter().enumerate() {
        println!(
            "   region {}: ({}, {}) - ({}, {})",
            i + 1,
            region.x1,
            region.y1,
            region.x2,
            region.y2
        );
    }
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   presence --config {} run", output_path.display());

    Ok(())
}
