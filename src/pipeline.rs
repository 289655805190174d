//! The upload pipeline.
//!
//! ```text
//! START → PREPARE_ENV → BUILD_ASSETS → [RECLAIM →] UPLOAD_FS → [RECLAIM →] UPLOAD_FW → (NOTIFY) → (MONITOR) → DONE
//!    any fatal stage failure → ABORT(exit_code)
//! ```
//!
//! Stages run strictly in order on the calling thread. Each stage reports
//! through [`PipelineError`]; [`Pipeline::settle`] is the only place that
//! decides whether an error stops the run. Reclaim results are always
//! downgraded to warnings.

use crate::assets::build_assets;
use crate::config::PipelineConfig;
use crate::environment::{ensure_environment, install_dependencies};
use crate::error::{PipelineError, Severity};
use crate::monitor::{notify, run_monitor};
use crate::reclaim::{NativeSerial, ProcessTable, Reclaimer, SerialOpener, SystemProcessTable};
use crate::runner::{find_on_path, CommandRunner, SystemRunner};
use crate::upload::{upload, UploadTarget};
use log::{error, info, warn};
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PrepareEnvironment,
    BuildAssets,
    Reclaim,
    UploadFilesystem,
    UploadFirmware,
    Notify,
    Monitor,
}

impl Stage {
    /// Progress banner printed when the stage starts.
    pub fn banner(&self) -> &'static str {
        match self {
            Stage::PrepareEnvironment => "Checking Python environment",
            Stage::BuildAssets => "Building frontend assets",
            Stage::Reclaim => "Preparing device connection",
            Stage::UploadFilesystem => "Uploading filesystem",
            Stage::UploadFirmware => "Uploading firmware",
            Stage::Notify => "Notifying",
            Stage::Monitor => "Monitoring serial output",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PrepareEnvironment => "environment setup",
            Stage::BuildAssets => "asset build",
            Stage::Reclaim => "device reclaim",
            Stage::UploadFilesystem => "filesystem upload",
            Stage::UploadFirmware => "firmware upload",
            Stage::Notify => "notification",
            Stage::Monitor => "serial monitor",
        };
        f.write_str(name)
    }
}

/// Which optional stages a pipeline run includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub name: &'static str,
    /// Package runner scripts for the asset build, in order.
    pub asset_scripts: Vec<String>,
    /// Capture asset build output instead of streaming it.
    pub capture_output: bool,
    /// Reclaim the port before each upload.
    pub reclaim: bool,
    pub notify: bool,
    pub monitor: bool,
}

impl Variant {
    /// Environment, CSS and JS builds, reclaim, both uploads.
    pub fn upload_all() -> Self {
        Self {
            name: "upload-all",
            asset_scripts: vec!["build-css".to_string(), "build-js-prod".to_string()],
            capture_output: true,
            reclaim: true,
            notify: false,
            monitor: false,
        }
    }

    /// Environment, combined frontend build, both uploads, sound, monitor.
    pub fn build_upload_monitor() -> Self {
        Self {
            name: "build-upload-monitor",
            asset_scripts: vec!["build".to_string()],
            capture_output: false,
            reclaim: false,
            notify: true,
            monitor: true,
        }
    }
}

/// What happened during a run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Stages entered, in order.
    pub stages: Vec<Stage>,
    pub warnings: Vec<PipelineError>,
    pub result: Result<(), PipelineError>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// 0 on success, otherwise the failing stage's code.
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(()) => 0,
            Err(e) => e.exit_code(),
        }
    }
}

/// Convert a pipeline exit code to a process exit code.
///
/// Codes the OS cannot represent collapse to 1 so a failure never reads as
/// success.
pub fn process_exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_byte(code))
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

pub struct Pipeline<'a, R, P, S> {
    config: &'a PipelineConfig,
    variant: Variant,
    runner: R,
    processes: P,
    serial: S,
    self_pid: u32,
    stages: Vec<Stage>,
    warnings: Vec<PipelineError>,
}

impl<'a> Pipeline<'a, SystemRunner, SystemProcessTable, NativeSerial> {
    /// Pipeline wired to real processes and serial devices.
    pub fn system(config: &'a PipelineConfig, variant: Variant) -> Self {
        Self::new(
            config,
            variant,
            SystemRunner,
            SystemProcessTable::new(),
            NativeSerial,
        )
    }
}

impl<'a, R: CommandRunner, P: ProcessTable, S: SerialOpener> Pipeline<'a, R, P, S> {
    pub fn new(
        config: &'a PipelineConfig,
        variant: Variant,
        runner: R,
        processes: P,
        serial: S,
    ) -> Self {
        Self {
            config,
            variant,
            runner,
            processes,
            serial,
            self_pid: std::process::id(),
            stages: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_self_pid(mut self, pid: u32) -> Self {
        self.self_pid = pid;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn processes(&self) -> &P {
        &self.processes
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    /// Run every stage and report the outcome.
    pub fn run(&mut self) -> PipelineReport {
        info!("Starting {} workflow...", self.variant.name);

        let result = self.execute();
        if let Err(e) = &result {
            error!("{}", e);
            if let Some(stderr) = e.stderr() {
                error!("   Error: {}", stderr);
            }
        }

        PipelineReport {
            stages: std::mem::take(&mut self.stages),
            warnings: std::mem::take(&mut self.warnings),
            result,
        }
    }

    fn execute(&mut self) -> Result<(), PipelineError> {
        let config = self.config;
        self.preflight()?;

        self.enter(Stage::PrepareEnvironment);
        let env = ensure_environment(&mut self.runner, config);
        self.settle(env)?;
        let installed = install_dependencies(&mut self.runner, config);
        self.settle(installed)?;

        if !self.variant.asset_scripts.is_empty() {
            self.enter(Stage::BuildAssets);
            let built = build_assets(
                &mut self.runner,
                config,
                &self.variant.asset_scripts,
                self.variant.capture_output,
            );
            self.settle(built)?;
            info!("Frontend build completed");
        }

        let mut port = config.port.clone();

        if self.variant.reclaim {
            port = self.reclaim().or(port);
        }
        self.enter(Stage::UploadFilesystem);
        let fs = upload(&mut self.runner, config, UploadTarget::Filesystem, port.as_deref());
        self.settle(fs)?;
        info!("Filesystem uploaded successfully!");

        if self.variant.reclaim {
            info!("Waiting for device to boot and stabilize after filesystem upload...");
            thread::sleep(config.delays.between_uploads);
            port = self.reclaim().or(port);
        }
        self.enter(Stage::UploadFirmware);
        let fw = upload(&mut self.runner, config, UploadTarget::Firmware, port.as_deref());
        self.settle(fw)?;
        info!("Firmware uploaded successfully!");
        info!("Complete upload finished!");

        if self.variant.notify {
            self.enter(Stage::Notify);
            let notified = notify(&mut self.runner, config);
            self.settle(notified)?;
        }

        if self.variant.monitor {
            self.enter(Stage::Monitor);
            run_monitor(&mut self.runner, config, port.as_deref());
        }

        Ok(())
    }

    /// Fail fast when a required tool is missing, before any side effects.
    fn preflight(&self) -> Result<(), PipelineError> {
        let Some(search_path) = &self.config.search_path else {
            return Ok(());
        };

        let mut required = vec![&self.config.flash_tool];
        if !self.variant.asset_scripts.is_empty() {
            required.push(&self.config.package_runner);
        }
        for tool in required {
            if find_on_path(tool, search_path).is_none() {
                if tool == &self.config.package_runner {
                    error!("Please ensure Node.js and npm are installed.");
                }
                return Err(PipelineError::ToolNotFound { tool: tool.clone() });
            }
        }
        Ok(())
    }

    /// Reclaim the device; returns the port it found, if any.
    fn reclaim(&mut self) -> Option<PathBuf> {
        self.enter(Stage::Reclaim);
        let report = Reclaimer::new(self.config, &mut self.processes, &self.serial)
            .with_self_pid(self.self_pid)
            .run(&mut self.runner);
        for warning in report.warnings {
            self.warn(warning);
        }
        report.port
    }

    fn enter(&mut self, stage: Stage) {
        info!("=== {} ===", stage.banner());
        self.stages.push(stage);
    }

    /// The single halt-or-continue policy.
    fn settle<T>(&mut self, result: Result<T, PipelineError>) -> Result<Option<T>, PipelineError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) => match e.severity() {
                Severity::Fatal => Err(e),
                Severity::Warning => {
                    self.warn(e);
                    Ok(None)
                }
            },
        }
    }

    fn warn(&mut self, e: PipelineError) {
        warn!("{} (continuing anyway)", e);
        self.warnings.push(e);
    }
}
