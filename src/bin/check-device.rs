//! Quick ESP32 connectivity check - no build required!
//!
//! Tests whether the board is connected and answering before an upload.
//!
//! Usage: cargo run --bin check-device -- [--port <device>] [--chip esp32c3]

use clap::Parser;
use esp_upload_pipeline::check::{probe_chip, PROBE_TIMEOUT, RECOVERY_HINTS};
use esp_upload_pipeline::cli::CommonArgs;
use esp_upload_pipeline::logging;
use esp_upload_pipeline::port::{list_available_ports, locate_port};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "check-device", version, about = "Quick ESP32 connectivity check")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Chip type passed to esptool
    #[arg(long)]
    chip: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.common.verbose);

    let mut config = match cli.common.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(chip) = cli.chip {
        config.chip = chip;
    }

    println!("Quick {} Connectivity Check", config.chip.to_uppercase());
    println!("{}", "=".repeat(40));

    let Some(port) = locate_port(config.port.as_deref(), &config.port_patterns).into_path() else {
        eprintln!("No serial port found. Check USB connection.");
        let available = list_available_ports();
        if !available.is_empty() {
            eprintln!("\nAvailable serial ports:");
            for port in &available {
                eprintln!("  {}", port);
            }
        }
        return ExitCode::FAILURE;
    };
    println!("Serial port {} exists", port.display());

    println!("Testing {} connection...", config.chip);
    match probe_chip(&config, &port, PROBE_TIMEOUT) {
        Ok(info) => {
            println!("{} detected and ready!", config.chip);
            for line in info {
                println!("   {}", line);
            }
            println!("\nReady for upload!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Connection failed: {}", e);
            eprintln!("\nTry these solutions:");
            for (i, hint) in RECOVERY_HINTS.iter().enumerate() {
                eprintln!("   {}. {}", i + 1, hint);
            }
            ExitCode::FAILURE
        }
    }
}
