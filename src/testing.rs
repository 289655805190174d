//! Recording fakes for the pipeline's external collaborators.

use crate::reclaim::processes::{ProcessEntry, ProcessTable};
use crate::reclaim::reset::{ControlLines, SerialOpener};
use crate::runner::{CommandOutput, CommandRunner, StageCommand};
use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

enum Scripted {
    Exit(i32, String),
    Killed,
    Missing,
}

/// Command runner that succeeds unless a rule matches.
///
/// Rules match when `needle` equals the program name or any single argument.
#[derive(Default)]
pub struct FakeRunner {
    rules: Vec<(String, Scripted)>,
    pub calls: Vec<StageCommand>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, needle: &str, code: i32, stderr: &str) -> Self {
        self.rules
            .push((needle.to_string(), Scripted::Exit(code, stderr.to_string())));
        self
    }

    pub fn killed(mut self, needle: &str) -> Self {
        self.rules.push((needle.to_string(), Scripted::Killed));
        self
    }

    pub fn missing(mut self, program: &str) -> Self {
        self.rules.push((program.to_string(), Scripted::Missing));
        self
    }

    /// Rendered command lines, in call order.
    pub fn lines(&self) -> Vec<String> {
        self.calls.iter().map(StageCommand::display).collect()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.calls.iter().any(|c| hits(c, needle))
    }
}

fn hits(command: &StageCommand, needle: &str) -> bool {
    command.program == needle || command.args.iter().any(|a| a == needle)
}

impl CommandRunner for FakeRunner {
    fn run(&mut self, command: &StageCommand) -> io::Result<CommandOutput> {
        self.calls.push(command.clone());
        let rule = self
            .rules
            .iter()
            .find(|(needle, _)| hits(command, needle));
        match rule {
            Some((_, Scripted::Exit(code, stderr))) => Ok(CommandOutput {
                code: Some(*code),
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
            Some((_, Scripted::Killed)) => Ok(CommandOutput::default()),
            Some((_, Scripted::Missing)) => Err(io::Error::from(io::ErrorKind::NotFound)),
            None => Ok(CommandOutput {
                code: Some(0),
                stdout: "ok\n".to_string(),
                stderr: String::new(),
            }),
        }
    }
}

/// In-memory process table.
#[derive(Default)]
pub struct FakeProcesses {
    pub entries: Vec<ProcessEntry>,
    /// Pids that ignore SIGTERM.
    pub stubborn: HashSet<u32>,
    /// Pids that cannot be signalled at all.
    pub protected: HashSet<u32>,
    pub terminated: Vec<u32>,
    pub killed: Vec<u32>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pid: u32, parent: Option<u32>, command: &str) -> Self {
        self.entries.push(ProcessEntry {
            pid,
            parent,
            command: command.to_string(),
        });
        self
    }

    fn gone(&self, pid: u32) -> bool {
        self.killed.contains(&pid)
            || (self.terminated.contains(&pid) && !self.stubborn.contains(&pid))
    }
}

impl ProcessTable for FakeProcesses {
    fn snapshot(&mut self) -> Vec<ProcessEntry> {
        self.entries
            .iter()
            .filter(|e| !self.gone(e.pid))
            .cloned()
            .collect()
    }

    fn terminate(&mut self, pid: u32) -> bool {
        if self.protected.contains(&pid) {
            return false;
        }
        self.terminated.push(pid);
        true
    }

    fn kill(&mut self, pid: u32) -> bool {
        if self.protected.contains(&pid) {
            return false;
        }
        self.killed.push(pid);
        true
    }

    fn is_running(&mut self, pid: u32) -> bool {
        self.entries.iter().any(|e| e.pid == pid) && !self.gone(pid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialEvent {
    Open(PathBuf, u32),
    Clear,
    Lines(bool),
    Close,
}

/// Serial opener that records every control-line change.
#[derive(Default)]
pub struct FakeSerial {
    pub events: Rc<RefCell<Vec<SerialEvent>>>,
    /// Zero-based open attempts that fail with "device busy".
    pub fail_opens: HashSet<usize>,
    /// Zero-based open attempts whose line toggle fails.
    pub fail_toggles: HashSet<usize>,
    opens: RefCell<usize>,
}

impl FakeSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open(mut self, attempt: usize) -> Self {
        self.fail_opens.insert(attempt);
        self
    }

    pub fn failing_toggle(mut self, attempt: usize) -> Self {
        self.fail_toggles.insert(attempt);
        self
    }

    pub fn events(&self) -> Vec<SerialEvent> {
        self.events.borrow().clone()
    }

    pub fn open_count(&self) -> usize {
        *self.opens.borrow()
    }
}

pub struct FakePort {
    events: Rc<RefCell<Vec<SerialEvent>>>,
    fail_toggle: bool,
}

impl ControlLines for FakePort {
    fn clear_buffers(&mut self) -> serialport::Result<()> {
        self.events.borrow_mut().push(SerialEvent::Clear);
        Ok(())
    }

    fn set_reset_lines(&mut self, level: bool) -> serialport::Result<()> {
        if self.fail_toggle {
            return Err(serialport::Error::new(
                serialport::ErrorKind::Io(io::ErrorKind::BrokenPipe),
                "device vanished",
            ));
        }
        self.events.borrow_mut().push(SerialEvent::Lines(level));
        Ok(())
    }
}

impl Drop for FakePort {
    fn drop(&mut self) {
        self.events.borrow_mut().push(SerialEvent::Close);
    }
}

impl SerialOpener for FakeSerial {
    type Port = FakePort;

    fn open(&self, path: &Path, baud_rate: u32) -> serialport::Result<FakePort> {
        let attempt = {
            let mut opens = self.opens.borrow_mut();
            *opens += 1;
            *opens - 1
        };
        if self.fail_opens.contains(&attempt) {
            return Err(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "device busy",
            ));
        }
        self.events
            .borrow_mut()
            .push(SerialEvent::Open(path.to_path_buf(), baud_rate));
        Ok(FakePort {
            events: self.events.clone(),
            fail_toggle: self.fail_toggles.contains(&attempt),
        })
    }
}
