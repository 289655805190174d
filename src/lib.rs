//! ESP32 upload pipeline.
//!
//! Builds frontend assets, then uploads the filesystem image and the firmware
//! to the board through PlatformIO. Before each upload the serial port can be
//! reclaimed from stuck monitors and the board pulsed into a known state.

pub mod assets;
pub mod check;
pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod port;
pub mod reclaim;
pub mod runner;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used items
pub use config::{ConfigError, PipelineConfig};
pub use error::{PipelineError, Severity};
pub use pipeline::{Pipeline, PipelineReport, Stage, Variant};
pub use port::{find_port, locate_port, PortResult};
