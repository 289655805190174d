//! Pipeline configuration.
//!
//! Everything a stage needs to know about the host (project directory, tool
//! names, device patterns) lives in [`PipelineConfig`] and is passed in
//! explicitly. Values come from built-in defaults, an optional
//! `upload-pipeline.json` in the project directory, and CLI overrides, in that
//! order.
//!
//! # Example
//!
//! ```
//! use esp_upload_pipeline::config::PipelineConfig;
//!
//! let config = PipelineConfig::for_project("/work/printer");
//! assert_eq!(config.env_path(), std::path::Path::new("/work/printer/.venv"));
//! assert_eq!(config.flash_tool, "pio");
//! ```

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the optional per-project config file.
pub const CONFIG_FILE_NAME: &str = "upload-pipeline.json";

/// Baud rate used when opening the port for the reset handshake.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Device naming conventions for USB-serial adapters, searched in order.
pub const DEFAULT_PORT_PATTERNS: &[&str] = &[
    "/dev/cu.usbserial-*",
    "/dev/cu.SLAB_USBtoUART*",
    "/dev/cu.usbmodem*",
    "/dev/cu.wchusbserial*",
    "/dev/ttyUSB*",
    "/dev/ttyACM*",
];

/// A class of process that commonly keeps a serial port open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderClass {
    /// Human-readable label used in log output.
    pub name: String,
    /// Case-insensitive regex matched against the full command line.
    pub pattern: String,
}

impl HolderClass {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

fn default_holders() -> Vec<HolderClass> {
    vec![
        HolderClass::new(
            "terminal multiplexer",
            r"\bscreen\b.*(usbserial|usbmodem|ttyusb|ttyacm)",
        ),
        HolderClass::new("minicom", r"\bminicom\b"),
        HolderClass::new("PlatformIO monitor", r"(pio|platformio).*monitor"),
        HolderClass::new("IDE serial extension", r"code.*serial"),
        HolderClass::new("Python serial tool", r"python.*(serial|miniterm)"),
    ]
}

fn default_notify_command() -> Vec<String> {
    ["afplay", "-v", "0.8", "/System/Library/Sounds/Glass.aiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Explicit configuration passed into every pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Root of the firmware project. Relative paths below resolve against it.
    #[serde(skip)]
    pub project_dir: PathBuf,
    /// Isolated Python environment directory.
    pub env_dir: PathBuf,
    /// Dependency manifest installed into the environment.
    pub manifest: PathBuf,
    /// Interpreter used to create the environment.
    pub python: String,
    /// Node package runner for the asset build.
    pub package_runner: String,
    /// Firmware build/flash tool.
    pub flash_tool: String,
    /// PlatformIO environment name passed as `-e`.
    pub pio_env: String,
    /// Serial port to use instead of scanning `port_patterns`.
    pub port: Option<PathBuf>,
    pub port_patterns: Vec<String>,
    pub baud_rate: u32,
    pub holders: Vec<HolderClass>,
    /// Kill holder-class processes even when no device path is known.
    pub allow_broad_match: bool,
    /// Reload the macOS USB host driver before the reset handshake.
    pub usb_reset: bool,
    /// Command played after a successful upload; empty disables it.
    pub notify_command: Vec<String>,
    /// Chip name passed to esptool by `check-device`.
    pub chip: String,
    /// Search path used for the tool preflight; `None` skips the check.
    #[serde(skip)]
    pub search_path: Option<OsString>,
    #[serde(skip)]
    pub delays: Delays,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            env_dir: PathBuf::from(".venv"),
            manifest: PathBuf::from("requirements.txt"),
            python: "python3".to_string(),
            package_runner: "npm".to_string(),
            flash_tool: "pio".to_string(),
            pio_env: "main".to_string(),
            port: None,
            port_patterns: DEFAULT_PORT_PATTERNS.iter().map(|s| s.to_string()).collect(),
            baud_rate: DEFAULT_BAUD_RATE,
            holders: default_holders(),
            allow_broad_match: false,
            usb_reset: false,
            notify_command: default_notify_command(),
            chip: "esp32c3".to_string(),
            search_path: None,
            delays: Delays::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults rooted at `project_dir`.
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Self::default()
        }
    }

    /// Load `upload-pipeline.json` from `project_dir` if present, else defaults.
    pub fn load(project_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let project_dir = project_dir.into();
        let path = project_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            log::debug!("No {} in {:?}, using defaults", CONFIG_FILE_NAME, project_dir);
            let config = Self::for_project(project_dir);
            config.validate()?;
            return Ok(config);
        }
        Self::load_from(project_dir, &path)
    }

    /// Load a config file at an explicit path.
    pub fn load_from(project_dir: impl Into<PathBuf>, path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.project_dir = project_dir.into();
        config.validate()?;
        log::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Check that holder patterns compile and required fields are set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for tool in [&self.python, &self.package_runner, &self.flash_tool, &self.pio_env] {
            if tool.trim().is_empty() {
                return Err(ConfigError::EmptyField);
            }
        }
        for holder in &self.holders {
            regex::Regex::new(&holder.pattern).map_err(|source| ConfigError::HolderPattern {
                name: holder.name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Resolve a path against the project directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn env_path(&self) -> PathBuf {
        self.resolve(&self.env_dir)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.resolve(&self.manifest)
    }

    /// Interpreter inside the isolated environment.
    pub fn env_python(&self) -> PathBuf {
        #[cfg(windows)]
        let relative = Path::new("Scripts").join("python.exe");
        #[cfg(not(windows))]
        let relative = Path::new("bin").join("python");
        self.env_path().join(relative)
    }
}

/// Fixed pauses used between pipeline steps.
///
/// These are not user-configurable; tests swap in [`Delays::none`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    /// DTR/RTS held low.
    pub reset_assert: Duration,
    /// DTR/RTS held high before closing the port.
    pub reset_release: Duration,
    /// After closing the port, before the next repetition.
    pub reset_close: Duration,
    /// After both repetitions, for the bootloader to stabilize.
    pub reset_settle: Duration,
    /// Between SIGTERM and SIGKILL for port holders.
    pub kill_grace: Duration,
    /// After process cleanup, before touching the port.
    pub cleanup_settle: Duration,
    /// Between kext unload and reload.
    pub usb_reload: Duration,
    /// Device boot time between filesystem and firmware upload.
    pub between_uploads: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            reset_assert: Duration::from_millis(100),
            reset_release: Duration::from_millis(100),
            reset_close: Duration::from_millis(200),
            reset_settle: Duration::from_secs(1),
            kill_grace: Duration::from_millis(500),
            cleanup_settle: Duration::from_millis(500),
            usb_reload: Duration::from_millis(500),
            between_uploads: Duration::from_secs(2),
        }
    }
}

impl Delays {
    pub const fn none() -> Self {
        Self {
            reset_assert: Duration::ZERO,
            reset_release: Duration::ZERO,
            reset_close: Duration::ZERO,
            reset_settle: Duration::ZERO,
            kill_grace: Duration::ZERO,
            cleanup_settle: Duration::ZERO,
            usb_reload: Duration::ZERO,
            between_uploads: Duration::ZERO,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("holder class `{name}` has an invalid pattern: {source}")]
    HolderPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("tool names and PlatformIO environment must not be empty")]
    EmptyField,
}
