//! Best-effort recovery of exclusive access to the serial device.
//!
//! A reclaim runs three phases: stop processes holding the port, optionally
//! reload the USB host driver, then pulse the reset lines. Nothing here can
//! fail the pipeline; every problem comes back as a warning in
//! [`ReclaimReport::warnings`].

pub mod processes;
pub mod reset;
pub mod usb;

pub use processes::{
    release_port_holders, CleanupReport, HolderMatcher, ProcessEntry, ProcessTable,
    SystemProcessTable,
};
pub use reset::{reset_handshake, HandshakeReport, NativeSerial, SerialOpener, RESET_REPETITIONS};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::port::{locate_port, PortResult};
use crate::runner::CommandRunner;
use log::info;
use std::path::PathBuf;

#[derive(Debug, Default)]
pub struct ReclaimReport {
    pub port: Option<PathBuf>,
    pub cleanup: Option<CleanupReport>,
    pub handshake: Option<HandshakeReport>,
    pub warnings: Vec<PipelineError>,
}

pub struct Reclaimer<'a, P, S> {
    config: &'a PipelineConfig,
    processes: &'a mut P,
    serial: &'a S,
    self_pid: u32,
}

impl<'a, P: ProcessTable, S: SerialOpener> Reclaimer<'a, P, S> {
    pub fn new(config: &'a PipelineConfig, processes: &'a mut P, serial: &'a S) -> Self {
        Self {
            config,
            processes,
            serial,
            self_pid: std::process::id(),
        }
    }

    /// Treat `pid` as the current process when protecting the own process tree.
    pub fn with_self_pid(mut self, pid: u32) -> Self {
        self.self_pid = pid;
        self
    }

    pub fn run(&mut self, runner: &mut impl CommandRunner) -> ReclaimReport {
        let config = self.config;
        let mut report = ReclaimReport::default();

        let port = locate_port(config.port.as_deref(), &config.port_patterns);
        match &port {
            PortResult::Configured(p) => info!("Using configured port: {}", p.display()),
            PortResult::Found(p) => info!("Found potential device port: {}", p.display()),
            PortResult::NotFound => report.warnings.push(PipelineError::PortNotFound {
                patterns: config.port_patterns.len(),
            }),
        }

        self.release_holders(&port, &mut report);

        if config.usb_reset {
            if let Err(e) = usb::reset_usb_subsystem(runner, config) {
                report.warnings.push(e);
            }
        }

        match port.path() {
            Some(path) => {
                let handshake =
                    reset_handshake(self.serial, path, config.baud_rate, &config.delays);
                report
                    .warnings
                    .extend(handshake.failures.iter().map(|f| PipelineError::SerialReset {
                        port: path.to_path_buf(),
                        repetition: f.repetition,
                        reason: f.reason.clone(),
                    }));
                report.handshake = Some(handshake);
            }
            None => info!("Skipping device reset - no port found"),
        }

        report.port = port.into_path();
        report
    }

    fn release_holders(&mut self, port: &PortResult, report: &mut ReclaimReport) {
        info!("Checking for serial port conflicts...");

        let matcher = match HolderMatcher::new(&self.config.holders, port.path()) {
            Ok(m) => m,
            Err(e) => {
                report.warnings.push(PipelineError::ProcessCleanup(e.to_string()));
                return;
            }
        };

        if !matcher.is_narrowed() && !self.config.allow_broad_match {
            info!("Skipping process cleanup - no device path to match holders against");
            return;
        }

        let cleanup = release_port_holders(
            &mut *self.processes,
            &matcher,
            self.self_pid,
            &self.config.delays,
        );
        report.warnings.extend(
            cleanup
                .failures
                .iter()
                .map(|f| PipelineError::ProcessCleanup(f.clone())),
        );
        info!("Serial port cleanup completed");
        report.cleanup = Some(cleanup);
    }
}
