//! Post-upload tail: success sound and serial monitor session.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::runner::CommandRunner;
use crate::runner::StageCommand;
use crate::upload::monitor_command;
use log::{debug, info};
use std::path::Path;

/// Play the configured notification sound.
pub fn notify(runner: &mut impl CommandRunner, config: &PipelineConfig) -> Result<(), PipelineError> {
    let Some((program, args)) = config.notify_command.split_first() else {
        debug!("Notification disabled");
        return Ok(());
    };

    info!("Playing success notification...");
    let command = StageCommand::new(program, &config.project_dir)
        .args(args.iter().map(String::as_str))
        .captured(true);
    let output = runner
        .run(&command)
        .map_err(|e| PipelineError::Notify(format!("{}: {}", program, e)))?;
    if !output.success() {
        return Err(PipelineError::Notify(format!(
            "{} exited with {:?}",
            program, output.code
        )));
    }
    info!("Success sound played");
    Ok(())
}

/// Attach to the device's serial output until interrupted.
///
/// The session's exit status is discarded.
pub fn run_monitor(runner: &mut impl CommandRunner, config: &PipelineConfig, port: Option<&Path>) {
    info!("Starting serial monitor (Ctrl+C to exit)...");
    match runner.run(&monitor_command(config, port)) {
        Ok(output) => debug!("Monitor exited with {:?}", output.code),
        Err(e) => debug!("Monitor could not start: {}", e),
    }
}
