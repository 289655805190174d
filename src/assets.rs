//! Frontend asset build (`npm run <script>`).

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::Stage;
use crate::runner::{run_stage, CommandRunner, StageCommand};
use log::info;

pub fn script_command(config: &PipelineConfig, script: &str, capture: bool) -> StageCommand {
    StageCommand::new(&config.package_runner, &config.project_dir)
        .args(["run", script])
        .captured(capture)
}

/// Run each script in order; the first failure aborts the build.
pub fn build_assets<S: AsRef<str>>(
    runner: &mut impl CommandRunner,
    config: &PipelineConfig,
    scripts: &[S],
    capture: bool,
) -> Result<(), PipelineError> {
    for script in scripts {
        let script = script.as_ref();
        info!("Running: {} run {}", config.package_runner, script);

        let output = run_stage(
            runner,
            Stage::BuildAssets,
            &script_command(config, script, capture),
        )?;

        info!("`{}` completed successfully", script);
        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            info!("   Output: {}", stdout);
        }
    }
    Ok(())
}
