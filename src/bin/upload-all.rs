//! Build frontend assets, then upload filesystem and firmware.
//!
//! Reclaims the serial port before each upload: stops monitors holding it
//! and pulses the board's reset lines.
//!
//! Usage: cargo run --bin upload-all -- [-C <project>] [--port <device>]

use clap::Parser;
use esp_upload_pipeline::cli::CommonArgs;
use esp_upload_pipeline::logging;
use esp_upload_pipeline::pipeline::{process_exit_code, Pipeline, Variant};
use log::error;
use std::process::ExitCode;

/// Upload FS + Firmware
#[derive(Parser)]
#[command(name = "upload-all", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
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

    let report = Pipeline::system(&config, Variant::upload_all()).run();
    process_exit_code(report.exit_code())
}
