//! Terminating processes that hold the serial port open.
//!
//! A process is a holder when its command line matches one of the configured
//! [`HolderClass`] patterns and, when a device path is known, also mentions
//! that device. The current process and its ancestors are never signalled:
//! the pipeline is usually launched by the very build tool whose monitor
//! pattern would otherwise match.

use crate::config::{Delays, HolderClass};
use log::{debug, info};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::path::Path;
use std::thread;
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};

/// Command lines are shortened to this many characters in log output.
const MAX_LOGGED_COMMAND: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    pub command: String,
}

/// Access to the host process table.
pub trait ProcessTable {
    fn snapshot(&mut self) -> Vec<ProcessEntry>;
    /// Send SIGTERM (or the platform equivalent). Returns false if not delivered.
    fn terminate(&mut self, pid: u32) -> bool;
    /// Force kill. Returns false if not delivered.
    fn kill(&mut self, pid: u32) -> bool;
    fn is_running(&mut self, pid: u32) -> bool;
}

/// Process table backed by `sysinfo`.
pub struct SystemProcessTable {
    system: System,
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh(&mut self, processes: ProcessesToUpdate<'_>) {
        self.system.refresh_processes_specifics(
            processes,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
    }
}

fn command_line(process: &Process) -> String {
    if process.cmd().is_empty() {
        process.name().to_string_lossy().into_owned()
    } else {
        process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&mut self) -> Vec<ProcessEntry> {
        self.refresh(ProcessesToUpdate::All);
        self.system
            .processes()
            .values()
            .map(|process| ProcessEntry {
                pid: process.pid().as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                command: command_line(process),
            })
            .collect()
    }

    fn terminate(&mut self, pid: u32) -> bool {
        self.system
            .process(Pid::from_u32(pid))
            .and_then(|p| p.kill_with(Signal::Term))
            .unwrap_or(false)
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.system
            .process(Pid::from_u32(pid))
            .map(|p| p.kill())
            .unwrap_or(false)
    }

    fn is_running(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.refresh(ProcessesToUpdate::Some(&[pid]));
        self.system.process(pid).is_some()
    }
}

/// Decides which command lines belong to serial port holders.
pub struct HolderMatcher {
    classes: Vec<(String, Regex)>,
    device: Option<Regex>,
}

impl HolderMatcher {
    /// Compile holder classes; `port` narrows matches to that device.
    pub fn new(classes: &[HolderClass], port: Option<&Path>) -> Result<Self, regex::Error> {
        let classes = classes
            .iter()
            .map(|class| {
                RegexBuilder::new(&class.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (class.name.clone(), re))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let device = port.map(device_pattern).transpose()?;
        Ok(Self { classes, device })
    }

    /// Whether matches are restricted to a specific device.
    pub fn is_narrowed(&self) -> bool {
        self.device.is_some()
    }

    /// Name of the holder class `command` belongs to, if any.
    pub fn classify(&self, command: &str) -> Option<&str> {
        let (name, _) = self.classes.iter().find(|(_, re)| re.is_match(command))?;
        if let Some(device) = &self.device {
            if !device.is_match(command) {
                return None;
            }
        }
        Some(name)
    }
}

/// Strings that identify `port` on a command line.
///
/// macOS exposes every adapter twice (`cu.*` for calling out, `tty.*` for
/// dial-in); a monitor holding either one blocks the other.
fn device_tokens(port: &Path) -> Vec<String> {
    let mut tokens = vec![port.to_string_lossy().to_lowercase()];
    if let Some(name) = port.file_name().map(|n| n.to_string_lossy().to_lowercase()) {
        if let Some(rest) = name.strip_prefix("cu.") {
            tokens.push(format!("tty.{}", rest));
        } else if let Some(rest) = name.strip_prefix("tty.") {
            tokens.push(format!("cu.{}", rest));
        }
        tokens.push(name);
    }
    tokens.dedup();
    tokens
}

/// Matches any token of `port` that ends at an argument boundary, so
/// `/dev/ttyUSB1` does not match `/dev/ttyUSB10`.
fn device_pattern(port: &Path) -> Result<Regex, regex::Error> {
    let alternatives = device_tokens(port)
        .iter()
        .map(|token| regex::escape(token))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&format!(r#"(?:{})(?:$|[\s"',=])"#, alternatives))
        .case_insensitive(true)
        .build()
}

/// `self_pid` and all of its ancestors.
pub fn own_lineage(entries: &[ProcessEntry], self_pid: u32) -> HashSet<u32> {
    let mut lineage = HashSet::new();
    let mut current = Some(self_pid);
    while let Some(pid) = current {
        if !lineage.insert(pid) {
            break;
        }
        current = entries
            .iter()
            .find(|e| e.pid == pid)
            .and_then(|e| e.parent);
    }
    lineage
}

/// A process identified as holding the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    pub pid: u32,
    pub class: String,
    pub command: String,
}

/// Holders among `entries`, skipping `protected` pids.
pub fn find_holders(
    entries: &[ProcessEntry],
    matcher: &HolderMatcher,
    protected: &HashSet<u32>,
) -> Vec<Holder> {
    entries
        .iter()
        .filter(|e| !protected.contains(&e.pid))
        .filter_map(|e| {
            matcher.classify(&e.command).map(|class| Holder {
                pid: e.pid,
                class: class.to_string(),
                command: e.command.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub holders: Vec<Holder>,
    /// Holders that ignored SIGTERM and were force killed.
    pub forced: Vec<u32>,
    /// Holders that could not be stopped.
    pub failures: Vec<String>,
}

fn shorten(command: &str) -> String {
    if command.chars().count() <= MAX_LOGGED_COMMAND {
        command.to_string()
    } else {
        let head: String = command.chars().take(MAX_LOGGED_COMMAND).collect();
        format!("{}...", head)
    }
}

/// Terminate every holder: SIGTERM, grace period, SIGKILL for survivors.
pub fn release_port_holders(
    table: &mut impl ProcessTable,
    matcher: &HolderMatcher,
    self_pid: u32,
    delays: &Delays,
) -> CleanupReport {
    let entries = table.snapshot();
    let protected = own_lineage(&entries, self_pid);
    let holders = find_holders(&entries, matcher, &protected);

    let mut report = CleanupReport::default();
    if holders.is_empty() {
        debug!("No serial port holders among {} processes", entries.len());
        return report;
    }

    let mut signalled = Vec::new();
    for holder in &holders {
        info!(
            "   Stopping {} (PID {}): {}",
            holder.class,
            holder.pid,
            shorten(&holder.command)
        );
        if table.terminate(holder.pid) {
            signalled.push(holder.pid);
        } else if table.is_running(holder.pid) {
            report
                .failures
                .push(format!("could not signal PID {} ({})", holder.pid, holder.class));
        }
    }

    if !signalled.is_empty() {
        thread::sleep(delays.kill_grace);
        for pid in signalled {
            if !table.is_running(pid) {
                continue;
            }
            if table.kill(pid) {
                debug!("Force killed PID {}", pid);
                report.forced.push(pid);
            } else {
                report.failures.push(format!("PID {} survived SIGKILL", pid));
            }
        }
    }

    thread::sleep(delays.cleanup_settle);
    report.holders = holders;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::testing::FakeProcesses;

    fn matcher(port: Option<&str>) -> HolderMatcher {
        HolderMatcher::new(&PipelineConfig::default().holders, port.map(Path::new)).unwrap()
    }

    #[test]
    fn test_broad_matching_uses_classes_only() {
        let m = matcher(None);
        assert!(!m.is_narrowed());
        assert_eq!(m.classify("minicom -D /dev/ttyUSB0"), Some("minicom"));
        assert_eq!(
            m.classify("/usr/bin/python3 /home/u/.platformio/penv/bin/pio device monitor"),
            Some("PlatformIO monitor")
        );
        assert_eq!(m.classify("SCREEN /dev/cu.usbserial-110 115200"), Some("terminal multiplexer"));
        assert_eq!(m.classify("vim notes.txt"), None);
    }

    #[test]
    fn test_narrowed_matching_requires_device() {
        let m = matcher(Some("/dev/cu.usbmodem1201"));
        assert!(m.is_narrowed());
        assert_eq!(
            m.classify("pio device monitor --port /dev/cu.usbmodem1201"),
            Some("PlatformIO monitor")
        );
        // Same class, different board
        assert_eq!(m.classify("pio device monitor --port /dev/cu.usbmodem9999"), None);
        // Mentions the device but is not a holder class
        assert_eq!(m.classify("ls -la /dev/cu.usbmodem1201"), None);
    }

    #[test]
    fn test_device_prefix_of_another_board_is_ignored() {
        let m = matcher(Some("/dev/ttyUSB1"));
        assert_eq!(m.classify("minicom -D /dev/ttyUSB10"), None);
        assert_eq!(m.classify("minicom -D /dev/ttyUSB1"), Some("minicom"));
        assert_eq!(m.classify("minicom -D /dev/ttyUSB1 -b 115200"), Some("minicom"));

        let m = matcher(Some("/dev/cu.usbmodem1"));
        assert_eq!(m.classify("screen /dev/cu.usbmodem1201 115200"), None);
        assert_eq!(
            m.classify("pio device monitor --port=/dev/cu.usbmodem1"),
            Some("PlatformIO monitor")
        );
        assert_eq!(
            m.classify("pio device monitor --port '/dev/tty.usbmodem1'"),
            Some("PlatformIO monitor")
        );
    }

    #[test]
    fn test_macos_dial_in_twin_matches() {
        let m = matcher(Some("/dev/cu.usbserial-110"));
        assert_eq!(
            m.classify("screen /dev/tty.usbserial-110 115200"),
            Some("terminal multiplexer")
        );
    }

    #[test]
    fn test_own_lineage_follows_parents() {
        let entries = vec![
            ProcessEntry { pid: 1, parent: None, command: "init".into() },
            ProcessEntry { pid: 50, parent: Some(1), command: "pio run -t monitor".into() },
            ProcessEntry { pid: 60, parent: Some(50), command: "upload-all".into() },
            ProcessEntry { pid: 70, parent: Some(1), command: "minicom".into() },
        ];
        let lineage = own_lineage(&entries, 60);
        assert_eq!(lineage, HashSet::from([60, 50, 1]));
    }

    #[test]
    fn test_own_lineage_survives_cycles() {
        let entries = vec![
            ProcessEntry { pid: 2, parent: Some(3), command: "a".into() },
            ProcessEntry { pid: 3, parent: Some(2), command: "b".into() },
        ];
        assert_eq!(own_lineage(&entries, 2), HashSet::from([2, 3]));
    }

    #[test]
    fn test_release_skips_own_process_tree() {
        let mut table = FakeProcesses::new()
            .with(1, None, "init")
            .with(40, Some(1), "platformio run -t upload_all -t monitor")
            .with(41, Some(40), "upload-all")
            .with(42, Some(1), "minicom -D /dev/ttyUSB0");

        let report = release_port_holders(&mut table, &matcher(None), 41, &Delays::none());

        assert_eq!(table.terminated, vec![42]);
        assert_eq!(report.holders.len(), 1);
        assert!(report.forced.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_release_force_kills_survivors() {
        let mut table = FakeProcesses::new()
            .with(10, None, "screen /dev/ttyUSB0 115200")
            .with(11, None, "minicom -D /dev/ttyUSB0");
        table.stubborn.insert(10);

        let report = release_port_holders(
            &mut table,
            &matcher(Some("/dev/ttyUSB0")),
            999,
            &Delays::none(),
        );

        assert_eq!(table.terminated, vec![10, 11]);
        assert_eq!(table.killed, vec![10]);
        assert_eq!(report.forced, vec![10]);
    }

    #[test]
    fn test_release_reports_unkillable_process() {
        let mut table = FakeProcesses::new().with(10, None, "minicom -D /dev/ttyUSB0");
        table.protected.insert(10);

        let report = release_port_holders(&mut table, &matcher(None), 999, &Delays::none());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("PID 10"));
    }

    #[test]
    fn test_release_with_no_holders_is_quiet() {
        let mut table = FakeProcesses::new().with(10, None, "bash");
        let report = release_port_holders(&mut table, &matcher(None), 999, &Delays::none());
        assert_eq!(report, CleanupReport::default());
        assert!(table.terminated.is_empty());
    }

    #[test]
    fn test_shorten_long_commands() {
        let long = "x".repeat(200);
        assert_eq!(shorten(&long).len(), MAX_LOGGED_COMMAND + 3);
        assert_eq!(shorten("pio"), "pio");
    }
}
