//! Quick device connectivity probe - no build required.
//!
//! Asks esptool (through PlatformIO's bundled package) for the chip id. A
//! board that answers is ready for upload.

use crate::config::PipelineConfig;
use crate::runner::{ProcessGuard, StageCommand};
use log::debug;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long esptool gets to answer.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Printed when the chip does not answer.
pub const RECOVERY_HINTS: &[&str] = &[
    "Put the board in boot mode (hold BOOT + press RESET)",
    "Try a different USB cable",
    "Check if another process is using the port",
];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("serial port {} not found", .0.display())]
    PortMissing(PathBuf),
    #[error("failed to run esptool: {0}")]
    Io(#[from] io::Error),
    #[error("connection timeout - device may need manual boot mode")]
    Timeout,
    #[error("{0}")]
    Failed(String),
}

pub fn probe_command(config: &PipelineConfig, port: &Path) -> StageCommand {
    StageCommand::new(&config.flash_tool, &config.project_dir)
        .args(["pkg", "exec", "--package", "tool-esptoolpy", "--", "esptool.py"])
        .args(["--chip", config.chip.as_str(), "--port"])
        .arg(port.to_string_lossy())
        .arg("--baud")
        .arg(config.baud_rate.to_string())
        .arg("chip_id")
        .captured(true)
}

/// Lines of esptool output that identify the chip.
pub fn chip_info(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("Chip is") || line.contains("MAC:"))
        .map(str::to_string)
        .collect()
}

/// Read `pipe` to the end on its own thread so the child never blocks on a
/// full pipe buffer.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut pipe) = pipe {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf)?;
            text = String::from_utf8_lossy(&buf).into_owned();
        }
        Ok(text)
    })
}

fn collect(reader: JoinHandle<io::Result<String>>) -> io::Result<String> {
    reader
        .join()
        .map_err(|_| io::Error::other("output reader panicked"))?
}

/// Probe the chip on `port`, killing esptool after `timeout`.
pub fn probe_chip(
    config: &PipelineConfig,
    port: &Path,
    timeout: Duration,
) -> Result<Vec<String>, ProbeError> {
    if !port.exists() {
        return Err(ProbeError::PortMissing(port.to_path_buf()));
    }

    let command = probe_command(config, port);
    debug!("Running `{}`", command.display());
    let child = Command::new(&command.program)
        .args(&command.args)
        .current_dir(&command.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Guard kills esptool if we bail out before it exits
    let mut guard = ProcessGuard(child);
    let stdout = drain(guard.0.stdout.take());
    let stderr = drain(guard.0.stderr.take());
    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = guard.0.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            return Err(ProbeError::Timeout);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = collect(stdout)?;
    let stderr = collect(stderr)?;

    if status.success() {
        Ok(chip_info(&stdout))
    } else {
        Err(ProbeError::Failed(stderr.trim().to_string()))
    }
}
