//! Build frontend, upload filesystem and firmware, then monitor.
//!
//! Plays a notification sound once both uploads succeed and stays attached
//! to the serial monitor until interrupted.
//!
//! Usage: cargo run --bin build-upload-monitor -- [-e <pio-env>] [--reclaim]

use clap::Parser;
use esp_upload_pipeline::cli::CommonArgs;
use esp_upload_pipeline::logging;
use esp_upload_pipeline::pipeline::{process_exit_code, Pipeline, Variant};
use log::{error, info};
use std::process::ExitCode;

/// Build, Upload FS & Firmware, Monitor
#[derive(Parser)]
#[command(name = "build-upload-monitor", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Stop port holders and reset the board before each upload
    #[arg(long)]
    reclaim: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.common.verbose);

    let config = match cli.common.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Using PlatformIO env: {}", config.pio_env);

    let variant = Variant {
        reclaim: cli.reclaim,
        ..Variant::build_upload_monitor()
    };
    let report = Pipeline::system(&config, variant).run();
    process_exit_code(report.exit_code())
}
