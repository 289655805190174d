//! Reload the macOS USB host driver.
//!
//! Needs passwordless sudo; without it the reset is skipped with a warning.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::runner::{CommandRunner, StageCommand};
use log::info;
use std::thread;

const USB_HOST_KEXT: &str = "com.apple.driver.usb.IOUSBHostFamily";

fn kext_command(config: &PipelineConfig, action: &str) -> StageCommand {
    StageCommand::new("sudo", &config.project_dir)
        .args(["-n", action, "-b", USB_HOST_KEXT])
        .captured(true)
}

pub fn reset_usb_subsystem(
    runner: &mut impl CommandRunner,
    config: &PipelineConfig,
) -> Result<(), PipelineError> {
    info!("Resetting USB subsystem...");

    let unload = runner
        .run(&kext_command(config, "kextunload"))
        .map_err(|e| PipelineError::UsbReset(e.to_string()))?;
    if !unload.success() {
        return Err(PipelineError::UsbReset("requires sudo".to_string()));
    }

    thread::sleep(config.delays.usb_reload);

    let load = runner
        .run(&kext_command(config, "kextload"))
        .map_err(|e| PipelineError::UsbReset(e.to_string()))?;
    if !load.success() {
        return Err(PipelineError::UsbReset(format!(
            "kextload exited with {:?}: {}",
            load.code,
            load.stderr.trim()
        )));
    }

    info!("USB subsystem reset completed");
    Ok(())
}
