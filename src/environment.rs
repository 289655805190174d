//! Isolated Python environment for the build tooling.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::runner::{CommandRunner, StageCommand};
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Created,
    Existing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Installed,
    NoManifest,
}

/// Create the environment directory if it does not exist yet.
///
/// Any failure here is fatal.
pub fn ensure_environment(
    runner: &mut impl CommandRunner,
    config: &PipelineConfig,
) -> Result<EnvironmentState, PipelineError> {
    let env_path = config.env_path();
    if env_path.exists() {
        info!("Using existing environment at {}", env_path.display());
        return Ok(EnvironmentState::Existing);
    }

    info!("Creating Python virtual environment...");
    let command = StageCommand::new(&config.python, &config.project_dir)
        .args(["-m", "venv"])
        .arg(env_path.to_string_lossy())
        .captured(true);

    let create_failed = |reason: String| PipelineError::EnvironmentCreate {
        path: env_path.clone(),
        reason,
    };
    let output = runner
        .run(&command)
        .map_err(|e| create_failed(format!("{}: {}", config.python, e)))?;
    if !output.success() {
        let reason = match output.code {
            Some(code) => format!("exit code {}: {}", code, output.stderr.trim()),
            None => "terminated by signal".to_string(),
        };
        return Err(create_failed(reason));
    }

    info!("Virtual environment created");
    Ok(EnvironmentState::Created)
}

/// Install the dependency manifest into the environment.
///
/// Failures come back as [`PipelineError::DependencyInstall`], a warning.
pub fn install_dependencies(
    runner: &mut impl CommandRunner,
    config: &PipelineConfig,
) -> Result<InstallState, PipelineError> {
    let manifest = config.manifest_path();
    if !manifest.exists() {
        info!("No {} found, skipping dependency install", manifest.display());
        return Ok(InstallState::NoManifest);
    }

    info!("Installing Python dependencies...");
    let command = StageCommand::new(config.env_python().to_string_lossy(), &config.project_dir)
        .args(["-m", "pip", "install", "-r"])
        .arg(manifest.to_string_lossy())
        .captured(true);

    let install_failed = |reason: String| PipelineError::DependencyInstall {
        manifest: manifest.clone(),
        reason,
    };
    let output = runner
        .run(&command)
        .map_err(|e| install_failed(e.to_string()))?;
    if !output.success() {
        return Err(install_failed(format!(
            "pip exited with {:?}: {}",
            output.code,
            output.stderr.trim()
        )));
    }

    info!("Python dependencies installed");
    Ok(InstallState::Installed)
}
