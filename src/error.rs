//! Pipeline error taxonomy.
//!
//! Every stage reports failure through [`PipelineError`]. Whether a failure
//! halts the pipeline is decided in one place, from [`PipelineError::severity`].

use crate::pipeline::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// How the pipeline reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Log and keep going.
    Warning,
    /// Abort the pipeline and exit with [`PipelineError::exit_code`].
    Fatal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to create environment at {}: {reason}", path.display())]
    EnvironmentCreate { path: PathBuf, reason: String },

    #[error("failed to install dependencies from {}: {reason}", manifest.display())]
    DependencyInstall { manifest: PathBuf, reason: String },

    #[error("`{tool}` not found on PATH")]
    ToolNotFound { tool: String },

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} failed with exit code {code}")]
    StageFailed {
        stage: Stage,
        code: i32,
        stderr: String,
    },

    #[error("{stage} was terminated by a signal")]
    StageTerminated { stage: Stage },

    #[error("no serial port matched any of {patterns} patterns")]
    PortNotFound { patterns: usize },

    #[error("serial reset on {} failed (repetition {repetition}): {reason}", port.display())]
    SerialReset {
        port: PathBuf,
        repetition: usize,
        reason: String,
    },

    #[error("process cleanup: {0}")]
    ProcessCleanup(String),

    #[error("USB subsystem reset skipped: {0}")]
    UsbReset(String),

    #[error("could not play notification: {0}")]
    Notify(String),
}

impl PipelineError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::EnvironmentCreate { .. }
            | Self::ToolNotFound { .. }
            | Self::Spawn { .. }
            | Self::StageFailed { .. }
            | Self::StageTerminated { .. } => Severity::Fatal,
            Self::DependencyInstall { .. }
            | Self::PortNotFound { .. }
            | Self::SerialReset { .. }
            | Self::ProcessCleanup(_)
            | Self::UsbReset(_)
            | Self::Notify(_) => Severity::Warning,
        }
    }

    /// Process exit code for a fatal error.
    ///
    /// A failing external command's own code is passed through unchanged.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StageFailed { code, .. } => *code,
            _ => 1,
        }
    }

    /// Captured standard error of the failing command, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::StageFailed { stderr, .. } if !stderr.trim().is_empty() => Some(stderr.trim()),
            _ => None,
        }
    }
}
