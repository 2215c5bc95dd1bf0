//! G-code Sender
//!
//! Sends G-code lines to a CNC or 3D-printer controller over a serial port
//! and shows everything the controller answers.
//!
//! # Usage
//!
//! ```bash
//! # Connect using config.yaml (port, baud, presets) from the current directory
//! gcode-sender
//!
//! # Override the port and baud rate from the command line
//! gcode-sender --port /dev/ttyACM0 --baud 250000
//!
//! # Use a different config file
//! gcode-sender --cfg ~/printer.toml
//!
//! # List available serial ports
//! gcode-sender --list-ports
//! ```
//!
//! # Config file
//!
//! ```yaml
//! port: /dev/ttyUSB0
//! baud: 115200
//! commands:
//!   - title: Home
//!     command: G28
//!     color: "#88cc88"
//!   - title: Preheat PLA
//!     command: [M104 S200, M140 S60]
//! ```

mod config;
mod console;
mod error;
mod log_sink;
mod serial;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use config::{FileConfig, Overrides};
use log_sink::{CommandLog, LogLine, LogSink};
use serial::Session;

/// G-code Sender
///
/// Send G-code to a serial-connected controller with quick-action presets
#[derive(Parser)]
#[command(name = "gcode-sender")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Send G-code to CNC/3D-printer controllers over serial")]
struct Cli {
    /// Config file (YAML, or TOML by .toml extension)
    #[arg(short, long, default_value = "config.yaml")]
    cfg: PathBuf,

    /// Serial port path (e.g., /dev/ttyUSB0), overrides the config file
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides the config file
    #[arg(short, long)]
    baud: Option<u32>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.list_ports {
        let ports = serial::list_ports().context("Failed to enumerate serial ports")?;
        serial::print_ports(&ports);
        return Ok(());
    }

    let file = FileConfig::load_or_default(&cli.cfg);
    let overrides = Overrides {
        port: cli.port,
        baud: cli.baud,
    };
    let config = file.resolve(&overrides);

    let command_log = Arc::new(CommandLog::new());
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<LogLine>();
    command_log.on_log_line(move |line| tx.append(line.clone()));
    let renderer = console::spawn_renderer(rx);

    println!(
        "{} G-code Sender on {} at {} baud",
        "[*]".cyan().bold(),
        config.device_path.white().bold(),
        config.baud_rate
    );

    let session = match Session::open(config, command_log.clone()) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            command_log.append(LogLine::error(&e));
            drop(command_log);
            let _ = renderer.await;
            return Err(e).context("Could not start serial session");
        }
    };

    let input = console::spawn_stdin_reader();
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    console::run(session, &file.commands, Arc::clone(&command_log), input, ctrl_c).await?;

    // Dropping the last log handle ends the renderer once it has drained
    drop(command_log);
    renderer.await.context("Log renderer failed")?;

    println!("{}", "Session closed".green());
    Ok(())
}
