//! Filesystem and firmware upload through PlatformIO.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::Stage;
use crate::runner::{run_stage, CommandRunner, StageCommand};
use log::info;
use std::path::Path;

/// The two images flashed to the device, in upload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadTarget {
    Filesystem,
    Firmware,
}

impl UploadTarget {
    /// PlatformIO target name.
    pub fn target(&self) -> &'static str {
        match self {
            UploadTarget::Filesystem => "uploadfs",
            UploadTarget::Firmware => "upload",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            UploadTarget::Filesystem => Stage::UploadFilesystem,
            UploadTarget::Firmware => Stage::UploadFirmware,
        }
    }
}

/// `pio run -e <env> -t <target>` with an explicit port when one is known.
pub fn upload_command(
    config: &PipelineConfig,
    target: UploadTarget,
    port: Option<&Path>,
) -> StageCommand {
    let command = StageCommand::new(&config.flash_tool, &config.project_dir).args([
        "run",
        "-e",
        config.pio_env.as_str(),
        "-t",
        target.target(),
    ]);
    match port {
        Some(port) => command.arg("--upload-port").arg(port.to_string_lossy()),
        None => command,
    }
}

pub fn upload(
    runner: &mut impl CommandRunner,
    config: &PipelineConfig,
    target: UploadTarget,
    port: Option<&Path>,
) -> Result<(), PipelineError> {
    let command = upload_command(config, target, port);
    info!("Running: {}", command.display());
    run_stage(runner, target.stage(), &command)?;
    Ok(())
}

/// `pio run -e <env> -t monitor`.
pub fn monitor_command(config: &PipelineConfig, port: Option<&Path>) -> StageCommand {
    let command = StageCommand::new(&config.flash_tool, &config.project_dir).args([
        "run",
        "-e",
        config.pio_env.as_str(),
        "-t",
        "monitor",
    ]);
    match port {
        Some(port) => command.arg("--monitor-port").arg(port.to_string_lossy()),
        None => command,
    }
}
