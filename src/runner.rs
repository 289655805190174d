//! Blocking external command execution.
//!
//! Stages describe what to run as a [`StageCommand`] and hand it to a
//! [`CommandRunner`]. [`SystemRunner`] spawns real processes; tests substitute
//! a recording fake.

use crate::error::PipelineError;
use crate::pipeline::Stage;
use log::debug;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// RAII guard to ensure child process is always cleaned up.
pub struct ProcessGuard(pub Child);

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Capture stdout/stderr instead of inheriting the terminal.
    pub capture: bool,
}

impl StageCommand {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            capture: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn captured(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    /// Shell-like rendering for log output.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished command. `code` is `None` when killed by a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external commands to completion.
pub trait CommandRunner {
    fn run(&mut self, command: &StageCommand) -> io::Result<CommandOutput>;
}

/// Spawns real processes and blocks until they exit.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, command: &StageCommand) -> io::Result<CommandOutput> {
        debug!("Running `{}` in {:?}", command.display(), command.cwd);

        let mut process = Command::new(&command.program);
        process.args(&command.args).current_dir(&command.cwd);

        if command.capture {
            let output = process.stdin(Stdio::null()).output()?;
            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            let status = process.status()?;
            Ok(CommandOutput {
                code: status.code(),
                ..CommandOutput::default()
            })
        }
    }
}

/// Run `command` for a fatal stage and map every non-success to an error.
pub fn run_stage(
    runner: &mut impl CommandRunner,
    stage: Stage,
    command: &StageCommand,
) -> Result<CommandOutput, PipelineError> {
    let output = runner
        .run(command)
        .map_err(|source| spawn_error(&command.program, source))?;

    match output.code {
        Some(0) => Ok(output),
        Some(code) => Err(PipelineError::StageFailed {
            stage,
            code,
            stderr: output.stderr,
        }),
        None => Err(PipelineError::StageTerminated { stage }),
    }
}

/// Classify a spawn failure; a missing binary gets its own error.
pub fn spawn_error(program: &str, source: io::Error) -> PipelineError {
    if source.kind() == io::ErrorKind::NotFound {
        PipelineError::ToolNotFound {
            tool: program.to_string(),
        }
    } else {
        PipelineError::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

/// Look up `tool` in a `PATH`-style search path.
///
/// Tools given as paths (containing a separator) are checked directly.
pub fn find_on_path(tool: &str, search_path: &OsStr) -> Option<PathBuf> {
    let direct = Path::new(tool);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }

    std::env::split_paths(search_path)
        .flat_map(|dir| executable_names(tool).map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn executable_names(tool: &str) -> impl Iterator<Item = String> + '_ {
    ["", ".exe", ".cmd", ".bat"]
        .into_iter()
        .map(move |ext| format!("{}{}", tool, ext))
}

#[cfg(not(windows))]
fn executable_names(tool: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(tool.to_string())
}
