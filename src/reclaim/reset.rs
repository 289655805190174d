//! Hardware reset handshake over the serial adapter's control lines.
//!
//! ESP32 dev boards wire DTR and RTS to EN and GPIO0. Pulling both low and
//! releasing them drops the chip back into a known state before the upload
//! tool connects.

use crate::config::Delays;
use log::{debug, info};
use serialport::{ClearBuffer, SerialPort};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Handshake repetitions per reclaim.
pub const RESET_REPETITIONS: usize = 2;

/// Read/write timeout for the handshake connection.
const PORT_TIMEOUT: Duration = Duration::from_secs(1);

/// The two operations the handshake needs from an open port.
///
/// Dropping the value closes the port.
pub trait ControlLines {
    fn clear_buffers(&mut self) -> serialport::Result<()>;
    /// Drive DTR and RTS together; `false` asserts reset.
    fn set_reset_lines(&mut self, level: bool) -> serialport::Result<()>;
}

impl ControlLines for Box<dyn SerialPort> {
    fn clear_buffers(&mut self) -> serialport::Result<()> {
        self.clear(ClearBuffer::All)
    }

    fn set_reset_lines(&mut self, level: bool) -> serialport::Result<()> {
        self.write_data_terminal_ready(level)?;
        self.write_request_to_send(level)
    }
}

/// Opens serial devices.
pub trait SerialOpener {
    type Port: ControlLines;

    fn open(&self, path: &Path, baud_rate: u32) -> serialport::Result<Self::Port>;
}

/// Opens real devices through `serialport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSerial;

impl SerialOpener for NativeSerial {
    type Port = Box<dyn SerialPort>;

    fn open(&self, path: &Path, baud_rate: u32) -> serialport::Result<Self::Port> {
        serialport::new(path.to_string_lossy(), baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepetitionFailure {
    /// One-based repetition number.
    pub repetition: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReport {
    pub port: PathBuf,
    pub repetitions: usize,
    pub failures: Vec<RepetitionFailure>,
}

impl HandshakeReport {
    pub fn succeeded(&self) -> usize {
        self.repetitions - self.failures.len()
    }
}

/// Run the reset handshake [`RESET_REPETITIONS`] times.
///
/// Repetitions are independent: a failure in one is recorded and the next is
/// still attempted. The settle delay always runs at the end.
pub fn reset_handshake<S: SerialOpener>(
    serial: &S,
    port: &Path,
    baud_rate: u32,
    delays: &Delays,
) -> HandshakeReport {
    info!("Resetting device connection on {}...", port.display());

    let mut failures = Vec::new();
    for repetition in 1..=RESET_REPETITIONS {
        info!("   Reset attempt {}/{}...", repetition, RESET_REPETITIONS);
        if let Err(e) = toggle_once(serial, port, baud_rate, delays) {
            debug!("Reset attempt {} failed: {}", repetition, e);
            failures.push(RepetitionFailure {
                repetition,
                reason: e.to_string(),
            });
        }
        thread::sleep(delays.reset_close);
    }

    // Bootloader needs time to come up before anything else opens the port
    thread::sleep(delays.reset_settle);

    let report = HandshakeReport {
        port: port.to_path_buf(),
        repetitions: RESET_REPETITIONS,
        failures,
    };
    if report.succeeded() > 0 {
        info!("Device connection reset completed");
    }
    report
}

fn toggle_once<S: SerialOpener>(
    serial: &S,
    port: &Path,
    baud_rate: u32,
    delays: &Delays,
) -> serialport::Result<()> {
    let mut lines = serial.open(port, baud_rate)?;
    lines.clear_buffers()?;

    lines.set_reset_lines(false)?;
    thread::sleep(delays.reset_assert);

    lines.set_reset_lines(true)?;
    thread::sleep(delays.reset_release);

    Ok(())
}
